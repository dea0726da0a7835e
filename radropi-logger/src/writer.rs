//! Blocking side of the logger: owns the open detection files

use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::record::{csv_appender, CsvRow, DetectionRecord};
use crate::session::SessionStats;
use chrono::NaiveDate;
use radropi_core::{Frame, LogEntry};
use radropi_eye::annotate::annotate_frame;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) enum WriterJob {
    Record { entry: LogEntry, frame: Option<Frame> },
    Flush(oneshot::Sender<()>),
}

struct DailyFiles {
    day: NaiveDate,
    jsonl: BufWriter<File>,
    csv: Option<csv::Writer<File>>,
}

pub(crate) struct DetectionWriter {
    detections_dir: PathBuf,
    images_dir: PathBuf,
    save_images: bool,
    csv_export: bool,
    files: Option<DailyFiles>,
    stats: Arc<SessionStats>,
}

impl DetectionWriter {
    pub(crate) fn new(config: &LoggerConfig, stats: Arc<SessionStats>) -> Self {
        Self {
            detections_dir: config.detections_dir(),
            images_dir: config.images_dir(),
            save_images: config.save_images,
            csv_export: config.csv_export,
            files: None,
            stats,
        }
    }

    /// Drain jobs until every sender is gone
    pub(crate) fn run(mut self, mut rx: tokio::sync::mpsc::Receiver<WriterJob>) {
        while let Some(job) = rx.blocking_recv() {
            match job {
                WriterJob::Record { entry, frame } => {
                    if let Err(e) = self.write(&entry, frame.as_ref()) {
                        self.stats.record_failure();
                        warn!("Failed to log detection of track {}: {}", entry.track.id, e);
                    }
                }
                WriterJob::Flush(done) => {
                    if let Err(e) = self.flush() {
                        self.stats.record_failure();
                        warn!("Failed to flush detection logs: {}", e);
                    }
                    let _ = done.send(());
                }
            }
        }
        if let Err(e) = self.flush() {
            warn!("Failed to flush detection logs on close: {}", e);
        }
        debug!("Detection writer finished");
    }

    fn write(&mut self, entry: &LogEntry, frame: Option<&Frame>) -> Result<(), LoggerError> {
        let image_path = match (&entry.image_ref, frame) {
            (Some(name), Some(frame)) if self.save_images => self.save_image(name, entry, frame),
            _ => None,
        };

        let record = DetectionRecord::from_entry(entry, image_path);
        let files = self.files_for(entry.timestamp.date_naive())?;
        files.jsonl.write_all(record.to_json_line()?.as_bytes())?;
        files.jsonl.flush()?;
        if let Some(csv) = files.csv.as_mut() {
            csv.serialize(CsvRow::from(&record))?;
            csv.flush()?;
        }

        self.stats.record_written(record.category, record.timestamp);
        debug!(
            "Logged {} track {} ({:.2})",
            record.category, record.track_id, record.confidence
        );
        Ok(())
    }

    /// Save the annotated frame; a failure only costs the image
    fn save_image(&self, name: &str, entry: &LogEntry, frame: &Frame) -> Option<String> {
        let result = annotate_frame(frame, &entry.track.bbox, entry.classification.category)
            .ok_or_else(|| LoggerError::Image(format!("frame {} is malformed", frame.sequence)))
            .and_then(|image| {
                std::fs::create_dir_all(&self.images_dir)?;
                image.save_with_format(self.images_dir.join(name), image::ImageFormat::Png)?;
                Ok(())
            });
        match result {
            Ok(()) => {
                self.stats.record_image();
                Some(format!("images/{}", name))
            }
            Err(e) => {
                self.stats.record_failure();
                warn!("Failed to save detection image {}: {}", name, e);
                None
            }
        }
    }

    fn files_for(&mut self, day: NaiveDate) -> Result<&mut DailyFiles, LoggerError> {
        let current = self.files.as_ref().map(|f| f.day);
        if current != Some(day) {
            self.flush()?;
            self.files = None;
            std::fs::create_dir_all(&self.detections_dir)?;
            let stem = format!("detections_{}", day.format("%Y%m%d"));
            let jsonl = BufWriter::new(open_append(&self.detections_dir.join(format!("{}.jsonl", stem)))?);
            let csv = if self.csv_export {
                Some(csv_appender(&self.detections_dir.join(format!("{}.csv", stem)))?)
            } else {
                None
            };
            self.files = Some(DailyFiles { day, jsonl, csv });
        }
        self.files.as_mut().ok_or(LoggerError::Closed)
    }

    fn flush(&mut self) -> Result<(), LoggerError> {
        if let Some(files) = self.files.as_mut() {
            files.jsonl.flush()?;
            if let Some(csv) = files.csv.as_mut() {
                csv.flush()?;
            }
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
