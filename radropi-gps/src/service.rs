//! Position/time service implementations

use crate::config::GpsConfig;
use crate::error::GpsError;
use crate::nmea::{fix_quality_description, parse_sentence, FixAccumulator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use radropi_core::PositionFix;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Supplies the current position and time. Never blocks and never fails:
/// without a usable fix it reports one with `fix_valid == false`.
#[async_trait]
pub trait PositionService: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), GpsError>;

    /// Fix as of `now`
    fn fix_at(&self, now: DateTime<Utc>) -> PositionFix;

    fn current_fix(&self) -> PositionFix {
        self.fix_at(Utc::now())
    }

    async fn stop(&self) -> Result<(), GpsError>;
}

/// Sentence counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GpsStats {
    pub sentences: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sentences: AtomicU64,
    rejected: AtomicU64,
}

type LineSource = Box<dyn BufRead + Send>;

/// Reads NMEA lines from any line source on a blocking thread
pub struct NmeaReceiver {
    name: String,
    freshness: Duration,
    source: Mutex<Option<LineSource>>,
    state: Arc<RwLock<FixAccumulator>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NmeaReceiver {
    pub fn from_reader(name: impl Into<String>, reader: impl BufRead + Send + 'static, config: &GpsConfig) -> Self {
        Self {
            name: name.into(),
            freshness: config.freshness(),
            source: Mutex::new(Some(Box::new(reader))),
            state: Arc::new(RwLock::new(FixAccumulator::new())),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    /// Receiver on a serial device
    #[cfg(feature = "serial")]
    pub fn open_serial(port: &str, config: &GpsConfig) -> Result<Self, GpsError> {
        let serial = serialport::new(port, config.baud_rate)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| GpsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        info!("GPS serial port {} opened @ {} baud", port, config.baud_rate);
        Ok(Self::from_reader(port, std::io::BufReader::new(serial), config))
    }

    pub fn stats(&self) -> GpsStats {
        GpsStats {
            sentences: self.counters.sentences.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Whether the reader thread has finished, e.g. at end of input
    pub fn is_finished(&self) -> bool {
        self.reader.lock().as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    fn read_loop(
        mut source: LineSource,
        state: Arc<RwLock<FixAccumulator>>,
        counters: Arc<Counters>,
        running: Arc<AtomicBool>,
    ) {
        let mut line = String::new();
        while running.load(Ordering::Relaxed) {
            line.clear();
            match source.read_line(&mut line) {
                Ok(0) => {
                    debug!("GPS input ended");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_sentence(trimmed) {
                        Ok(sentence) => {
                            counters.sentences.fetch_add(1, Ordering::Relaxed);
                            state.write().apply(&sentence, Utc::now());
                        }
                        Err(e) => {
                            counters.rejected.fetch_add(1, Ordering::Relaxed);
                            debug!("Rejected NMEA sentence {:?}: {}", trimmed, e);
                        }
                    }
                }
                Err(e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("GPS read error, receiver stopping: {}", e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl PositionService for NmeaReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), GpsError> {
        let source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| GpsError::Config(format!("GPS receiver {} already started", self.name)))?;

        self.running.store(true, Ordering::Relaxed);
        let state = self.state.clone();
        let counters = self.counters.clone();
        let running = self.running.clone();
        let handle = tokio::task::spawn_blocking(move || Self::read_loop(source, state, counters, running));
        *self.reader.lock() = Some(handle);
        info!("GPS receiver {} started", self.name);
        Ok(())
    }

    fn fix_at(&self, now: DateTime<Utc>) -> PositionFix {
        self.state.read().fix_at(now, self.freshness)
    }

    async fn stop(&self) -> Result<(), GpsError> {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            // a blocking read only notices the flag after its own timeout
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                warn!("GPS reader thread did not stop within 1s");
            }
        }
        let stats = self.stats();
        let fix = self.current_fix();
        info!(
            "GPS receiver {} stopped: {} sentences, {} rejected, last quality {}",
            self.name,
            stats.sentences,
            stats.rejected,
            fix_quality_description(fix.fix_quality)
        );
        Ok(())
    }
}

/// Fixed or scripted fixes for hardware-free runs.
///
/// Each `fix_at` call consumes the next scripted fix; the last one repeats.
/// Scripted fixes are re-stamped with the query time.
pub struct MockPositionService {
    script: Mutex<VecDeque<PositionFix>>,
    last: Mutex<Option<PositionFix>>,
    started: AtomicBool,
}

impl MockPositionService {
    pub fn scripted(fixes: impl IntoIterator<Item = PositionFix>) -> Self {
        Self {
            script: Mutex::new(fixes.into_iter().collect()),
            last: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Always-valid fix at the given location
    pub fn fixed(latitude: f64, longitude: f64, altitude_m: Option<f64>) -> Self {
        Self::scripted([PositionFix {
            latitude: Some(latitude),
            longitude: Some(longitude),
            altitude_m,
            satellites: 8,
            fix_quality: 1,
            hdop: Some(1.2),
            fix_valid: true,
            timestamp: Utc::now(),
        }])
    }

    pub fn from_config(config: &GpsConfig) -> Self {
        Self::fixed(config.mock_latitude, config.mock_longitude, Some(config.mock_altitude_m))
    }

    /// Receiver that never acquires a fix
    pub fn no_fix() -> Self {
        Self::scripted([PositionFix::unknown(Utc::now())])
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PositionService for MockPositionService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self) -> Result<(), GpsError> {
        self.started.store(true, Ordering::Relaxed);
        info!("Mock GPS started with simulated location");
        Ok(())
    }

    fn fix_at(&self, now: DateTime<Utc>) -> PositionFix {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(fix) = next {
            *last = Some(fix);
        }
        match *last {
            Some(fix) => PositionFix { timestamp: now, ..fix },
            None => PositionFix::unknown(now),
        }
    }

    async fn stop(&self) -> Result<(), GpsError> {
        self.started.store(false, Ordering::Relaxed);
        info!("Mock GPS stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::checksum;
    use std::io::Cursor;

    fn sentence(body: &str) -> String {
        format!("${}*{:02X}\r\n", body, checksum(body))
    }

    #[tokio::test]
    async fn test_receiver_reads_until_eof() {
        let mut input = String::new();
        input.push_str(&sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"));
        input.push_str("$GPGGA,garbage*00\r\n");
        input.push_str(&sentence("GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1"));

        let receiver = NmeaReceiver::from_reader("test", Cursor::new(input), &GpsConfig::default());
        receiver.start().await.unwrap();
        for _ in 0..100 {
            if receiver.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = receiver.stats();
        assert_eq!(stats.sentences, 2);
        assert_eq!(stats.rejected, 1);
        let fix = receiver.current_fix();
        assert!(fix.fix_valid);
        assert_eq!(fix.hdop, Some(1.3));
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_receiver_survives_garbled_line() {
        let mut input = String::from("$GPG\u{e9}\u{e9},1,2\r\n");
        input.push_str(&sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"));

        let receiver = NmeaReceiver::from_reader("noisy", Cursor::new(input), &GpsConfig::default());
        receiver.start().await.unwrap();
        for _ in 0..100 {
            if receiver.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = receiver.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.sentences, 1);
        assert!(receiver.current_fix().fix_valid);
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_receiver_without_input_reports_unknown() {
        let receiver = NmeaReceiver::from_reader("idle", Cursor::new(Vec::new()), &GpsConfig::default());
        receiver.start().await.unwrap();
        let fix = receiver.current_fix();
        assert!(!fix.fix_valid);
        assert!(fix.coordinates().is_none());
        assert!(receiver.start().await.is_err());
        receiver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_receiver_fix_goes_stale() {
        let input = sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let config = GpsConfig {
            freshness_ms: 1_000,
            ..GpsConfig::default()
        };
        let receiver = NmeaReceiver::from_reader("stale", Cursor::new(input), &config);
        receiver.start().await.unwrap();
        for _ in 0..100 {
            if receiver.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(receiver.fix_at(Utc::now()).fix_valid);
        let later = receiver.fix_at(Utc::now() + chrono::Duration::seconds(2));
        assert!(!later.fix_valid);
        assert!(later.latitude.is_none());
    }

    #[tokio::test]
    async fn test_mock_fixed() {
        let mock = MockPositionService::from_config(&GpsConfig::default());
        mock.start().await.unwrap();
        assert!(mock.is_started());
        let fix = mock.current_fix();
        assert_eq!(fix.coordinates(), Some((40.7128, -74.0060)));
        assert_eq!(mock.current_fix().coordinates(), Some((40.7128, -74.0060)));
    }

    #[tokio::test]
    async fn test_mock_script_then_sticky() {
        let now = Utc::now();
        let valid = PositionFix {
            latitude: Some(1.0),
            longitude: Some(2.0),
            altitude_m: None,
            satellites: 5,
            fix_quality: 1,
            hdop: None,
            fix_valid: true,
            timestamp: now,
        };
        let mock = MockPositionService::scripted([valid, PositionFix::unknown(now)]);
        assert!(mock.current_fix().fix_valid);
        assert!(!mock.current_fix().fix_valid);
        assert!(!mock.current_fix().fix_valid);
        assert!(!MockPositionService::no_fix().current_fix().fix_valid);
    }
}
