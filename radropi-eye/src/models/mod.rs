//! Classifier capability and its timeout-guarded runner

pub mod classifier;
pub mod runner;

pub use classifier::{
    ClassificationRequest, Classifier, CroppedRegion, FixedClassifier, HeuristicClassifier,
};
pub use runner::{ClassifierRunner, ClassifierStats, ClassifierStatsSnapshot};
