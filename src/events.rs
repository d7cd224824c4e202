//! # Stage: Event Ingestion & Aggregation
//!
//! ## Responsibility
//! Types for the append-only experiment event stream (exposures,
//! conversions, custom events) and an in-memory sink that aggregates them
//! into the per-variant count snapshots the statistics engine consumes.
//!
//! ## Guarantees
//! - Participants are counted as distinct subjects per (test, variant), not
//!   raw exposure events
//! - Aggregation snapshots are plain values; reading one never blocks
//!
//! ## NOT Responsible For
//! - Durable event storage (the production sink is an external collaborator
//!   fed by a thin HTTP endpoint outside this crate)
//! - Significance evaluation (see `stats`)

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::stats::VariantCounts;

// ---------------------------------------------------------------------------
// AbEvent
// ---------------------------------------------------------------------------

/// Kind of experiment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Subject was exposed to a variant.
    Exposure,
    /// Subject performed the qualifying outcome.
    Conversion,
    /// Any other named event; carried through for downstream analysis.
    Custom(String),
}

/// One record in the append-only experiment event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbEvent {
    pub test_name: String,
    pub variant: String,
    pub event: EventKind,
    /// Optional revenue-style value attached to conversions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub subject_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AbEvent {
    pub fn exposure(test_name: impl Into<String>, variant: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self::new(test_name, variant, EventKind::Exposure, subject_id)
    }

    pub fn conversion(test_name: impl Into<String>, variant: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self::new(test_name, variant, EventKind::Conversion, subject_id)
    }

    fn new(
        test_name: impl Into<String>,
        variant: impl Into<String>,
        event: EventKind,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            variant: variant.into(),
            event,
            value: None,
            subject_id: subject_id.into(),
            timestamp_ms: now_ms(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Append-only destination for experiment events.
pub trait EventSink {
    fn record(&mut self, event: AbEvent);
}

/// In-memory [`EventSink`] that keeps the raw stream and live per-variant
/// aggregates. Production deployments push events to an external store;
/// this implementation backs tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Vec<AbEvent>,
    /// (test, variant) → distinct exposed subjects.
    exposed: HashMap<(String, String), HashSet<String>>,
    /// (test, variant) → (conversions, value sum).
    conversions: HashMap<(String, String), (u64, f64)>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All recorded events for one test, in arrival order.
    pub fn events_for(&self, test_name: &str) -> Vec<&AbEvent> {
        self.events.iter().filter(|e| e.test_name == test_name).collect()
    }

    /// Aggregate snapshot for one (test, variant) arm — the shape the
    /// statistics engine consumes.
    pub fn counts(&self, test_name: &str, variant: &str) -> VariantCounts {
        let key = (test_name.to_string(), variant.to_string());
        let participants = self.exposed.get(&key).map(|s| s.len() as u64).unwrap_or(0);
        let (conversions, value_sum) = self.conversions.get(&key).copied().unwrap_or((0, 0.0));
        VariantCounts { participants, conversions, value_sum }
    }
}

impl EventSink for MemoryEventSink {
    fn record(&mut self, event: AbEvent) {
        let key = (event.test_name.clone(), event.variant.clone());
        match &event.event {
            EventKind::Exposure => {
                self.exposed.entry(key).or_default().insert(event.subject_id.clone());
            }
            EventKind::Conversion => {
                let entry = self.conversions.entry(key).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += event.value.unwrap_or(0.0);
            }
            EventKind::Custom(_) => {}
        }
        self.events.push(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
