//! # Events Module
//!
//! Everything about the data that flows through the relay: the raw upstream
//! envelope (`aparat`), the stable schema handed to subscribers
//! (`normalized`) and the classifier that maps one onto the other.

/// Serde model of the upstream envelope.
pub mod aparat;
/// Raw frame -> normalized event, with follow dedup.
pub mod classifier;
/// The stable, platform-independent event schema.
pub mod normalized;

pub use classifier::{ClassifierOptions, EventClassifier};
pub use normalized::{EventKind, NormalizedEvent};
