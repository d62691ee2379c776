//! Fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::Array3;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::camera::{FrameHandle, FrameSource};
use crate::error::{DetectionError, ModelError};
use crate::inference::{FrameScheduler, RenderContext};
use crate::ml::{BoundingBox, DetectionResult, Detector, DetectorLoader, Landmark};
use crate::state::{OverlayState, StateSink};

/// Observable side effects, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pull(u64),
    DetectStarted(u64),
    Publish { cycle: u64, count: usize },
    Release(u64),
    UpdatePreview,
    EndFrame,
}

impl Event {
    pub fn count_publishes(events: &[Event]) -> usize {
        events.iter().filter(|e| matches!(e, Event::Publish { .. })).count()
    }

    pub fn count_pulls(events: &[Event]) -> usize {
        events.iter().filter(|e| matches!(e, Event::Pull(_))).count()
    }

    pub fn count_releases(events: &[Event]) -> usize {
        events.iter().filter(|e| matches!(e, Event::Release(_))).count()
    }
}

/// Append-only event log that tests can wait on.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
    notify: Arc<Notify>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Wait (up to 5s) until `predicate` holds for the log.
    pub async fn wait_for(&self, predicate: impl Fn(&[Event]) -> bool) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if predicate(self.events.lock().as_slice()) {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(std::time::Duration::from_secs(5), wait)
            .await
            .is_err()
        {
            panic!("timed out waiting for events, log: {:?}", self.events());
        }
    }
}

/// A confident face with three landmarks inside the 152x200 model space.
pub fn face_result(score: f32) -> DetectionResult {
    DetectionResult::face(
        BoundingBox::new([40.0, 50.0], [110.0, 150.0]),
        vec![
            Landmark::new(60.0, 80.0),
            Landmark::new(90.0, 80.0),
            Landmark::new(75.0, 120.0),
        ],
        score,
    )
}

/// Frame source that makes up tiny frames and records pulls and releases.
pub struct ScriptedSource {
    log: EventLog,
    next_id: u64,
    available: bool,
}

impl ScriptedSource {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            next_id: 1,
            available: true,
        }
    }

    /// A source that never has a frame ready
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<FrameHandle> {
        if !self.available {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.log.push(Event::Pull(id));
        Some(FrameHandle::new(id, Array3::zeros((4, 4, 3))))
    }

    fn release(&mut self, frame: FrameHandle) {
        self.log.push(Event::Release(frame.id()));
    }
}

/// Detector returning one face per call, with scripted failures and gates.
pub struct FakeDetector {
    log: EventLog,
    calls: AtomicU64,
    failing: HashSet<u64>,
    gates: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl FakeDetector {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            calls: AtomicU64::new(0),
            failing: HashSet::new(),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the `call`-th estimate (1-based).
    pub fn failing_on(mut self, call: u64) -> Self {
        self.failing.insert(call);
        self
    }

    /// Block the `call`-th estimate until the returned gate is notified.
    pub fn gated_on(self, call: u64) -> (Arc<Notify>, Self) {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(call, gate.clone());
        (gate, self)
    }
}

impl Detector for FakeDetector {
    async fn estimate(&self, frame: &FrameHandle) -> Result<Vec<DetectionResult>, DetectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(Event::DetectStarted(frame.id()));

        let gate = self.gates.lock().remove(&call);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.contains(&call) {
            return Err(DetectionError::Inference("scripted failure".to_string()));
        }
        Ok(vec![face_result(0.9)])
    }
}

/// Sink that records publishes and forwards them to an [`OverlayState`].
pub struct RecordingSink {
    log: EventLog,
    state: OverlayState,
}

impl RecordingSink {
    pub fn new(log: EventLog) -> Self {
        Self::forwarding(log, OverlayState::new())
    }

    pub fn forwarding(log: EventLog, state: OverlayState) -> Self {
        Self { log, state }
    }
}

impl StateSink for RecordingSink {
    fn publish(&self, cycle: u64, results: Vec<DetectionResult>) -> bool {
        let accepted = self.state.publish(cycle, results.clone());
        if accepted {
            self.log.push(Event::Publish {
                cycle,
                count: results.len(),
            });
        }
        accepted
    }
}

pub struct RecordingRender {
    log: EventLog,
}

impl RecordingRender {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl RenderContext for RecordingRender {
    fn update_preview(&mut self) {
        self.log.push(Event::UpdatePreview);
    }

    fn end_frame(&mut self) {
        self.log.push(Event::EndFrame);
    }
}

/// Scheduler ticking once per message sent on the paired sender.
pub struct ManualTicks {
    ticks: mpsc::UnboundedReceiver<()>,
}

impl FrameScheduler for ManualTicks {
    async fn next_tick(&mut self) -> bool {
        self.ticks.recv().await.is_some()
    }
}

pub fn manual_ticks() -> (mpsc::UnboundedSender<()>, ManualTicks) {
    let (sender, ticks) = mpsc::unbounded_channel();
    (sender, ManualTicks { ticks })
}

/// Loader that resolves once a detector is sent on the paired channel.
pub struct ChannelLoader {
    detector: oneshot::Receiver<FakeDetector>,
}

impl ChannelLoader {
    pub fn new() -> (oneshot::Sender<FakeDetector>, Self) {
        let (sender, detector) = oneshot::channel();
        (sender, Self { detector })
    }
}

impl DetectorLoader for ChannelLoader {
    type Detector = FakeDetector;

    async fn load(self) -> Result<FakeDetector, ModelError> {
        self.detector
            .await
            .map_err(|_| ModelError::Task("loader channel closed".to_string()))
    }
}

/// Loader whose model is never found.
pub struct FailingLoader;

impl DetectorLoader for FailingLoader {
    type Detector = FakeDetector;

    async fn load(self) -> Result<FakeDetector, ModelError> {
        Err(ModelError::NotFound("missing.onnx".into()))
    }
}
