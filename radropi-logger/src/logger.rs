//! Event logger front end

use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::session::{SessionStats, SessionSummary};
use crate::writer::{DetectionWriter, WriterJob};
use chrono::Utc;
use parking_lot::Mutex;
use radropi_core::{Frame, LogEntry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Non-blocking detection logger.
///
/// `record` waits at most `enqueue_timeout_ms` for queue space; on timeout
/// the entry is dropped and counted. Writes happen on a dedicated blocking
/// thread, and their failures are counted rather than returned.
pub struct EventLogger {
    config: LoggerConfig,
    tx: Mutex<Option<mpsc::Sender<WriterJob>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SessionStats>,
}

impl EventLogger {
    /// Create the log directories and start the writer
    pub fn start(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate().map_err(LoggerError::Config)?;
        for dir in [config.detections_dir(), config.images_dir(), config.exports_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        if config.retention_days > 0 {
            match cleanup_old_files(&config.log_dir, config.retention_days) {
                Ok(0) => {}
                Ok(removed) => info!("Removed {} log files older than {} days", removed, config.retention_days),
                Err(e) => warn!("Log retention cleanup failed: {}", e),
            }
        }

        let stats = Arc::new(SessionStats::new(Utc::now()));
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let writer = DetectionWriter::new(&config, stats.clone());
        let handle = tokio::task::spawn_blocking(move || writer.run(rx));

        info!(
            "Event logger session {} started in {} (queue {}, enqueue timeout {}ms)",
            stats.session_id(),
            config.log_dir.display(),
            config.queue_capacity,
            config.enqueue_timeout_ms
        );
        Ok(Self {
            config,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            stats,
        })
    }

    /// Queue an entry, with the frame to annotate when images are enabled
    pub async fn record(&self, entry: LogEntry, frame: Option<Frame>) -> Result<(), LoggerError> {
        let tx = self.tx.lock().clone().ok_or(LoggerError::Closed)?;
        let track_id = entry.track.id;
        let frame = frame.filter(|_| self.config.save_images);
        match tx
            .send_timeout(WriterJob::Record { entry, frame }, self.config.enqueue_timeout())
            .await
        {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.stats.record_drop();
                debug!("Log queue full, dropped entry for track {}", track_id);
                Err(LoggerError::QueueFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(LoggerError::Closed),
        }
    }

    /// Wait until everything queued so far is on disk
    pub async fn flush(&self) -> Result<(), LoggerError> {
        let tx = self.tx.lock().clone().ok_or(LoggerError::Closed)?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WriterJob::Flush(done_tx))
            .await
            .map_err(|_| LoggerError::Closed)?;
        done_rx.await.map_err(|_| LoggerError::Closed)
    }

    /// Drain the queue, stop the writer and export the session summary
    pub async fn shutdown(&self) -> Result<SessionSummary, LoggerError> {
        drop(self.tx.lock().take());
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Detection writer ended abnormally: {}", e);
            }
        }

        let summary = self.stats.summary(Utc::now());
        if self.config.session_export {
            let path = self.export_summary(&summary)?;
            info!("Session summary exported to {}", path.display());
        }
        info!(
            "Event logger stopped: {} records ({} meteor, {} asteroid, {} non-meteor), {} images, {} write failures, {} dropped",
            summary.records_written,
            summary.detections.meteor,
            summary.detections.asteroid,
            summary.detections.non_meteor,
            summary.images_saved,
            summary.write_failures,
            summary.queue_drops
        );
        Ok(summary)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Remove detection and image files older than `days_to_keep`
    pub fn cleanup_old_files(&self, days_to_keep: u32) -> Result<usize, LoggerError> {
        cleanup_old_files(&self.config.log_dir, days_to_keep)
    }

    fn export_summary(&self, summary: &SessionSummary) -> Result<PathBuf, LoggerError> {
        let dir = self.config.exports_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "session_{}.json",
            summary.started_at.format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(summary)?)?;
        Ok(path)
    }
}

/// Remove files under `images/` and `detections/` of `log_dir` whose
/// modification time is at least `days_to_keep` days old
pub fn cleanup_old_files(log_dir: &Path, days_to_keep: u32) -> Result<usize, LoggerError> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(u64::from(days_to_keep) * 86_400))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    for sub in ["images", "detections"] {
        let dir = log_dir.join(sub);
        if !dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if metadata.modified()? <= cutoff {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
