//! On-disk record formats: JSON lines and the CSV tabular export

use crate::error::LoggerError;
use chrono::{DateTime, Utc};
use radropi_core::{BoundingBox, Category, LogEntry, LogReason, TrackId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path;

const UNKNOWN_POSITION: &str = "unknown";

/// Where the detection happened, or the literal `"unknown"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedPosition {
    Fix {
        latitude: f64,
        longitude: f64,
        altitude_m: Option<f64>,
    },
    Unknown(String),
}

impl RecordedPosition {
    pub fn unknown() -> Self {
        RecordedPosition::Unknown(UNKNOWN_POSITION.to_string())
    }

    pub fn is_known(&self) -> bool {
        matches!(self, RecordedPosition::Fix { .. })
    }
}

/// One line of `detections_YYYYMMDD.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Utc>,
    pub frame_sequence: u64,
    pub track_id: TrackId,
    pub category: Category,
    pub confidence: f32,
    pub reason: LogReason,
    pub bbox: BoundingBox,
    pub velocity: (f32, f32),
    pub lifetime: u32,
    pub position: RecordedPosition,
    pub satellites: u8,
    pub fix_valid: bool,
    /// Path of the annotated frame relative to the log directory
    pub image_path: Option<String>,
}

impl DetectionRecord {
    pub fn from_entry(entry: &LogEntry, image_path: Option<String>) -> Self {
        let position = match entry.position.coordinates() {
            Some((latitude, longitude)) => RecordedPosition::Fix {
                latitude,
                longitude,
                altitude_m: entry.position.altitude_m,
            },
            None => RecordedPosition::unknown(),
        };
        Self {
            timestamp: entry.timestamp,
            frame_sequence: entry.frame_sequence,
            track_id: entry.track.id,
            category: entry.classification.category,
            confidence: entry.classification.confidence,
            reason: entry.reason,
            bbox: entry.track.bbox,
            velocity: entry.track.velocity,
            lifetime: entry.track.lifetime,
            fix_valid: position.is_known(),
            position,
            satellites: entry.position.satellites,
            image_path,
        }
    }

    pub fn to_json_line(&self) -> Result<String, LoggerError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// One row of the CSV export; field order is the column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub timestamp: DateTime<Utc>,
    pub track_id: TrackId,
    pub category: Category,
    pub confidence: f32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fix_valid: bool,
    pub image_path: Option<String>,
}

impl From<&DetectionRecord> for CsvRow {
    fn from(record: &DetectionRecord) -> Self {
        let (latitude, longitude) = match record.position {
            RecordedPosition::Fix { latitude, longitude, .. } => (Some(latitude), Some(longitude)),
            RecordedPosition::Unknown(_) => (None, None),
        };
        Self {
            timestamp: record.timestamp,
            track_id: record.track_id,
            category: record.category,
            confidence: record.confidence,
            latitude,
            longitude,
            fix_valid: record.fix_valid,
            image_path: record.image_path.clone(),
        }
    }
}

/// Open a CSV export for appending; the header goes out only on a new file
pub(crate) fn csv_appender(path: &Path) -> Result<csv::Writer<File>, LoggerError> {
    let fresh = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(csv::WriterBuilder::new().has_headers(fresh).from_writer(file))
}

/// Read every data row of a CSV export
pub fn read_csv(path: &Path) -> Result<Vec<CsvRow>, LoggerError> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .collect::<Result<Vec<CsvRow>, csv::Error>>()
        .map_err(LoggerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use radropi_core::{PositionFix, TrackSnapshot, TrackState};

    fn entry(position: PositionFix) -> LogEntry {
        let now = Utc.with_ymd_and_hms(2024, 8, 12, 22, 14, 3).unwrap();
        let track = TrackSnapshot {
            id: 7,
            bbox: BoundingBox::new(10.0, 12.0, 6.0, 3.0),
            velocity: (40.0, 0.0),
            category: Category::Meteor,
            confidence: 0.9,
            state: TrackState::Confirmed,
            age: 0,
            hits: 3,
            lifetime: 3,
            first_seen: now,
            last_seen: now,
        };
        LogEntry::new(now, 42, track, position, LogReason::Detection, true)
    }

    fn valid_fix() -> PositionFix {
        PositionFix {
            latitude: Some(48.1173),
            longitude: Some(11.5167),
            altitude_m: Some(545.4),
            satellites: 8,
            fix_quality: 1,
            hdop: Some(0.9),
            fix_valid: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_with_fix() {
        let record = DetectionRecord::from_entry(&entry(valid_fix()), Some("images/a.png".to_string()));
        assert!(record.fix_valid);
        let line = record.to_json_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"latitude\":48.1173"));
        let back: DetectionRecord = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(back, record);
    }

    fn csv_text(rows: &[CsvRow]) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer.serialize(row).unwrap();
        }
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_record_without_fix_says_unknown() {
        let record = DetectionRecord::from_entry(&entry(PositionFix::unknown(Utc::now())), None);
        assert!(!record.fix_valid);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["position"], "unknown");

        let row = CsvRow::from(&record);
        assert_eq!(row.latitude, None);
        assert!(csv_text(&[row]).contains(",,,false,"));
    }

    #[test]
    fn test_stale_coordinates_never_logged() {
        // coordinates present but the fix is no longer valid
        let stale = PositionFix {
            fix_valid: false,
            ..valid_fix()
        };
        let record = DetectionRecord::from_entry(&entry(stale), None);
        assert_eq!(record.position, RecordedPosition::unknown());
    }

    #[test]
    fn test_csv_header_and_columns() {
        let record = DetectionRecord::from_entry(&entry(valid_fix()), Some("images/x.png".to_string()));
        let text = csv_text(&[CsvRow::from(&record)]);
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,track_id,category,confidence,latitude,longitude,fix_valid,image_path")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2024-08-12T22:14:03Z,7,meteor,"));
        assert!(row.ends_with(",true,images/x.png"));
    }

    #[test]
    fn test_csv_appender_writes_header_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("detections.csv");
        let mut record = DetectionRecord::from_entry(&entry(valid_fix()), Some("images/a,\"b\".png".to_string()));

        let mut first = csv_appender(&path).unwrap();
        first.serialize(CsvRow::from(&record)).unwrap();
        first.flush().unwrap();
        drop(first);

        record.track_id = 8;
        record.position = RecordedPosition::unknown();
        record.fix_valid = false;
        let mut second = csv_appender(&path).unwrap();
        second.serialize(CsvRow::from(&record)).unwrap();
        second.flush().unwrap();
        drop(second);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("timestamp,track_id").count(), 1);

        let rows = read_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].track_id, 7);
        assert_eq!(rows[0].category, Category::Meteor);
        assert!((rows[0].latitude.unwrap() - 48.1173).abs() < 1e-6);
        // quoting survives the round trip
        assert_eq!(rows[0].image_path.as_deref(), Some("images/a,\"b\".png"));
        assert_eq!(rows[1].track_id, 8);
        assert_eq!(rows[1].latitude, None);
        assert!(!rows[1].fix_valid);
    }

    #[test]
    fn test_csv_rejects_malformed() {
        let dir = tempfile::TempDir::new().unwrap();
        let header = "timestamp,track_id,category,confidence,latitude,longitude,fix_valid,image_path\n";
        for body in [
            "yesterday,1,meteor,0.9,,,false,\n",
            "2024-08-12T22:14:03Z,1,comet,0.9,,,false,\n",
            "2024-08-12T22:14:03Z,1,meteor\n",
        ] {
            let path = dir.path().join("bad.csv");
            std::fs::write(&path, format!("{}{}", header, body)).unwrap();
            assert!(read_csv(&path).is_err(), "accepted {:?}", body);
        }
    }
}
