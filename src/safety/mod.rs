//! Content safety
//!
//! Inline classifiers run on every sent or edited message.

mod classifier;

pub use classifier::{Assessment, CrisisDetection, PolicyVerdict, SafetyClassifier, severity_for};
