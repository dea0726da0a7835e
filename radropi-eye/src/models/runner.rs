//! Latency-bounded execution of a classifier

use crate::config::ClassifierConfig;
use crate::error::VisionError;
use crate::models::classifier::{ClassificationRequest, Classifier, CroppedRegion};
use futures::stream::{self, StreamExt};
use radropi_core::{Classification, Frame, Region};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters shared between the runner and whoever reports on it
#[derive(Debug, Default)]
pub struct ClassifierStats {
    calls: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStatsSnapshot {
    pub calls: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl ClassifierStats {
    pub fn snapshot(&self) -> ClassifierStatsSnapshot {
        ClassifierStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Runs one cycle's classification requests concurrently, each under the
/// configured timeout. A request that times out or errors resolves to
/// [`Classification::fallback`] so the cycle always gets one result per region.
#[derive(Clone)]
pub struct ClassifierRunner {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    max_concurrent: usize,
    crop_padding: u32,
    stats: Arc<ClassifierStats>,
}

impl ClassifierRunner {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ClassifierConfig) -> Self {
        Self {
            classifier,
            timeout: config.timeout(),
            max_concurrent: config.max_concurrent.max(1),
            crop_padding: config.crop_padding,
            stats: Arc::new(ClassifierStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.classifier.name()
    }

    pub fn stats(&self) -> Arc<ClassifierStats> {
        self.stats.clone()
    }

    /// Warm the classifier up; a failure here is fatal to startup
    pub async fn load(&self) -> Result<(), VisionError> {
        self.classifier.load().await?;
        info!("Classifier '{}' loaded", self.classifier.name());
        Ok(())
    }

    /// Classify every region of `frame`, preserving input order
    pub async fn classify_all(&self, frame: &Frame, regions: &[Region]) -> Vec<Classification> {
        let requests: Vec<Option<ClassificationRequest>> = regions
            .iter()
            .map(|region| {
                CroppedRegion::from_frame(frame, region, self.crop_padding).map(|crop| ClassificationRequest {
                    crop,
                    region: *region,
                    frame_sequence: frame.sequence,
                    captured_at: frame.captured_at,
                })
            })
            .collect();

        stream::iter(requests)
            .map(move |request| async move {
                match request {
                    Some(request) => self.classify_one(&request).await,
                    None => {
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        debug!("Region of frame {} could not be cropped", frame.sequence);
                        Classification::fallback()
                    }
                }
            })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    async fn classify_one(&self, request: &ClassificationRequest) -> Classification {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.timeout, self.classifier.classify(request)).await {
            Ok(Ok(classification)) => Classification::new(classification.category, classification.confidence),
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Classifier '{}' failed on frame {}: {}", self.classifier.name(), request.frame_sequence, e);
                Classification::fallback()
            }
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Classifier '{}' exceeded {:?} on frame {}",
                    self.classifier.name(),
                    self.timeout,
                    request.frame_sequence
                );
                Classification::fallback()
            }
        }
    }
}
