//! Alert reconciliation: folds SOS events and operator resolutions into the
//! collection of alerts currently requiring attention.
//!
//! Every transition returns a new [`AlertCollection`] and leaves the previous
//! one untouched, so a snapshot handed to the dashboard never changes under it.

use crate::models::AlertRecord;
use std::sync::Arc;
use tracing::debug;

/// Per-axis tolerance, in degrees, under which two locations count as the same
/// place (roughly 11 m of latitude).
///
/// This is an axis-aligned box test, not a geodesic distance. Near the poles
/// and across the antimeridian it misses points that are physically close.
///
/// The test is not transitive. An event that falls within range of two
/// records of the same user refreshes only the first (most recent) one, so
/// the other stays and both are then within range of the new head.
pub const PROXIMITY_EPSILON: f64 = 0.0001;

/// Immutable, most-recently-updated-first list of outstanding alerts.
///
/// Cloning is cheap; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct AlertCollection {
    records: Arc<Vec<Arc<AlertRecord>>>,
}

impl AlertCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AlertRecord> {
        self.records.get(index).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertRecord> {
        self.records.iter().map(Arc::as_ref)
    }

    /// True when both values are the very same snapshot.
    pub fn ptr_eq(&self, other: &AlertCollection) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }

    /// Folds one event in. An existing record for the same user within
    /// [`PROXIMITY_EPSILON`] on both axes is dropped and the event takes the
    /// head; otherwise the event is prepended as a new alert.
    pub fn ingest(&self, event: AlertRecord) -> AlertCollection {
        let refreshed = self
            .records
            .iter()
            .position(|existing| is_same_source(existing, &event));

        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.push(Arc::new(event));
        records.extend(
            self.records
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != refreshed)
                .map(|(_, r)| Arc::clone(r)),
        );

        if let Some(index) = refreshed {
            debug!(index, "Refreshed existing alert and promoted it to the head");
        }

        AlertCollection {
            records: Arc::new(records),
        }
    }

    /// Removes the first record matching `target` exactly on user id,
    /// timestamp, latitude and longitude. A stale or unknown target leaves the
    /// collection as is and returns the same snapshot.
    pub fn resolve(&self, target: &AlertRecord) -> AlertCollection {
        let Some(index) = self.records.iter().position(|r| r.same_alert(target)) else {
            return self.clone();
        };

        let mut records = Vec::with_capacity(self.records.len() - 1);
        records.extend_from_slice(&self.records[..index]);
        records.extend_from_slice(&self.records[index + 1..]);

        AlertCollection {
            records: Arc::new(records),
        }
    }
}

impl FromIterator<AlertRecord> for AlertCollection {
    /// Builds a collection that is already in display order; no
    /// reconciliation is applied.
    fn from_iter<I: IntoIterator<Item = AlertRecord>>(iter: I) -> Self {
        AlertCollection {
            records: Arc::new(iter.into_iter().map(Arc::new).collect()),
        }
    }
}

fn is_same_source(existing: &AlertRecord, event: &AlertRecord) -> bool {
    existing.user_id == event.user_id
        && (existing.location.latitude - event.location.latitude).abs() < PROXIMITY_EPSILON
        && (existing.location.longitude - event.location.longitude).abs() < PROXIMITY_EPSILON
}

/// Owner of the current collection for one session.
#[derive(Debug, Default)]
pub struct AlertEngine {
    current: AlertCollection,
}

impl AlertEngine {
    /// Resumes from a previously published snapshot.
    pub fn with_collection(current: AlertCollection) -> Self {
        Self { current }
    }

    pub fn current(&self) -> &AlertCollection {
        &self.current
    }

    pub fn ingest(&mut self, event: AlertRecord) -> AlertCollection {
        self.current = self.current.ingest(event);
        self.current.clone()
    }

    pub fn resolve(&mut self, target: &AlertRecord) -> AlertCollection {
        self.current = self.current.resolve(target);
        self.current.clone()
    }
}
