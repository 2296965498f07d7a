//! Map marker routing.
//!
//! A finished turn may carry geocoded places. They are handed to whichever
//! map handlers the embedding application registered in a [`MarkerRegistry`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event::DonePayload;

/// A geocoded point of interest attached to a `done` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Null, missing or unparseable coordinates decode as `None`.
    #[serde(default, alias = "lat", deserialize_with = "lenient_coordinate")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lng", deserialize_with = "lenient_coordinate")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub title: String,
    /// Any other fields the backend sent (address, period, image, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Marker {
    /// `(latitude, longitude)` when both are known.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Accepts numbers and numeric strings.
fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let coordinate = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(coordinate.filter(|c| c.is_finite()))
}

/// Decodes a marker list one element at a time, dropping entries that are
/// not markers.
pub(crate) fn deserialize_markers<'de, D>(deserializer: D) -> Result<Vec<Marker>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Marker>(value) {
            Ok(marker) => Some(marker),
            Err(err) => {
                warn!("skipping unreadable map marker: {err}");
                None
            }
        })
        .collect())
}

/// Marker categories that have a dedicated handler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Festival,
    Attraction,
}

impl MarkerKind {
    pub fn all() -> [MarkerKind; 2] {
        [MarkerKind::Festival, MarkerKind::Attraction]
    }

    /// Value of the marker `type` field for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::Festival => "festival",
            MarkerKind::Attraction => "attraction",
        }
    }

    /// The `has_*` flag of the payload that enables this category.
    fn enabled_by(&self, done: &DonePayload) -> bool {
        match self {
            MarkerKind::Festival => done.has_festivals,
            MarkerKind::Attraction => done.has_attractions,
        }
    }
}

/// Receives markers destined for the map.
pub trait MarkerSink: Send + Sync {
    fn place_markers(&self, markers: &[Marker]);
}

impl<F> MarkerSink for F
where
    F: Fn(&[Marker]) + Send + Sync,
{
    fn place_markers(&self, markers: &[Marker]) {
        self(markers)
    }
}

/// Handlers registered by the map surface. Every slot is optional.
#[derive(Default)]
pub struct MarkerRegistry {
    all: Option<Box<dyn MarkerSink>>,
    by_kind: HashMap<MarkerKind, Box<dyn MarkerSink>>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that takes every marker at once. When set, per-kind handlers
    /// are not consulted.
    pub fn on_all(mut self, sink: impl MarkerSink + 'static) -> Self {
        self.all = Some(Box::new(sink));
        self
    }

    pub fn on_kind(mut self, kind: MarkerKind, sink: impl MarkerSink + 'static) -> Self {
        self.by_kind.insert(kind, Box::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_none() && self.by_kind.is_empty()
    }
}

impl fmt::Debug for MarkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerRegistry")
            .field("all", &self.all.is_some())
            .field("by_kind", &self.by_kind.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Which handlers fired for one `done` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of markers handed to the catch-all handler.
    pub all: Option<usize>,
    /// Per-kind handlers that ran, with their marker counts.
    pub by_kind: Vec<(MarkerKind, usize)>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.all.is_none() && self.by_kind.is_empty()
    }
}

/// Routes marker geodata from finished turns to the registry.
#[derive(Debug, Default)]
pub struct SideEffectDispatcher {
    registry: MarkerRegistry,
}

impl SideEffectDispatcher {
    pub fn new(registry: MarkerRegistry) -> Self {
        Self { registry }
    }

    /// Markers without a usable position never reach a handler.
    pub fn dispatch(&self, done: &DonePayload) -> DispatchReport {
        let mut report = DispatchReport::default();
        let placeable: Vec<Marker> = done
            .map_markers
            .iter()
            .filter(|m| m.position().is_some())
            .cloned()
            .collect();
        if placeable.len() < done.map_markers.len() {
            debug!(
                skipped = done.map_markers.len() - placeable.len(),
                "markers without coordinates skipped"
            );
        }
        if placeable.is_empty() {
            return report;
        }

        if let Some(sink) = &self.registry.all {
            sink.place_markers(&placeable);
            report.all = Some(placeable.len());
            debug!(count = placeable.len(), "placed all markers");
            return report;
        }

        for kind in MarkerKind::all() {
            if !kind.enabled_by(done) {
                continue;
            }
            let Some(sink) = self.registry.by_kind.get(&kind) else {
                continue;
            };
            let markers: Vec<Marker> = placeable
                .iter()
                .filter(|m| m.kind == kind.as_str())
                .cloned()
                .collect();
            sink.place_markers(&markers);
            debug!(kind = kind.as_str(), count = markers.len(), "placed markers");
            report.by_kind.push((kind, markers.len()));
        }

        report
    }
}
