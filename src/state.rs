//! Shared overlay state
//!
//! The inference loop publishes detection sets here; the host reads the latest
//! set to render the overlay. Once detached (component torn down) publishes
//! are ignored.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::ml::DetectionResult;

/// Receiver of the loop's published detection sets.
pub trait StateSink: Send + Sync {
    /// Publish the results of `cycle`. Returns `false` if the update was suppressed.
    fn publish(&self, cycle: u64, results: Vec<DetectionResult>) -> bool;
}

/// Latest published detections as seen by the renderer
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Cycle that produced the detections (0 before the first publish)
    pub cycle: u64,
    pub detections: Option<Arc<[DetectionResult]>>,
}

#[derive(Default)]
struct Inner {
    snapshot: Snapshot,
    publishes: u64,
    detached: bool,
}

/// Application-side overlay state, cheap to clone.
#[derive(Clone, Default)]
pub struct OverlayState {
    inner: Arc<Mutex<Inner>>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept publishes again and clear any previous detections.
    pub fn attach(&self) {
        let mut inner = self.inner.lock();
        inner.detached = false;
        inner.snapshot = Snapshot::default();
    }

    /// Stop accepting publishes. Existing detections stay readable.
    pub fn detach(&self) {
        self.inner.lock().detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.inner.lock().detached
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Number of accepted publishes
    pub fn publish_count(&self) -> u64 {
        self.inner.lock().publishes
    }
}

impl StateSink for OverlayState {
    fn publish(&self, cycle: u64, results: Vec<DetectionResult>) -> bool {
        let mut inner = self.inner.lock();
        if inner.detached {
            tracing::debug!(cycle, "Ignoring publish to detached overlay state");
            return false;
        }
        inner.snapshot = Snapshot {
            cycle,
            detections: Some(results.into()),
        };
        inner.publishes += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{BoundingBox, Landmark};

    fn face() -> DetectionResult {
        DetectionResult::face(BoundingBox::default(), vec![Landmark::new(1.0, 2.0)], 0.9)
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let state = OverlayState::new();
        assert!(state.snapshot().detections.is_none());

        assert!(state.publish(1, vec![face()]));
        assert!(state.publish(2, vec![face(), face()]));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.cycle, 2);
        assert_eq!(snapshot.detections.map(|d| d.len()), Some(2));
        assert_eq!(state.publish_count(), 2);
    }

    #[test]
    fn test_detached_state_ignores_publish() {
        let state = OverlayState::new();
        let loop_side = state.clone();
        assert!(loop_side.publish(1, vec![face()]));

        state.detach();
        assert!(!loop_side.publish(2, vec![]));
        assert_eq!(state.snapshot().cycle, 1);
        assert_eq!(state.publish_count(), 1);

        state.attach();
        assert!(state.snapshot().detections.is_none());
        assert!(loop_side.publish(3, vec![]));
    }
}
