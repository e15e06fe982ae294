//! Progress events and the observer list that fans them out.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use vetscan_assets::QualityLevel;
use vetscan_common::{EntityId, SessionId};

/// What happened in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "quality", rename_all = "snake_case")]
pub enum ProgressStage {
    /// Procedural fallback attached.
    Fallback,
    /// A non-final level was swapped in.
    Loaded(QualityLevel),
    /// A level could not be fetched or decoded.
    Failed(QualityLevel),
    Complete,
    /// The lowest level failed; the fallback stays.
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub session: SessionId,
    pub entity: EntityId,
    #[serde(flatten)]
    pub stage: ProgressStage,
    pub percent: u8,
    /// Time since the session started.
    pub elapsed: Duration,
    pub at: SystemTime,
}

/// Percent reported when chain index `index` of `len` levels is swapped in.
/// Only meaningful for non-final levels; completion reports 100.
pub fn level_percent(index: usize, len: usize) -> u8 {
    if len <= 1 {
        return 20;
    }
    (20 + 70 * index / (len - 1)).min(90) as u8
}

pub const FALLBACK_PERCENT: u8 = 10;
pub const COMPLETE_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback)>,
    channels: Vec<mpsc::UnboundedSender<ProgressEvent>>,
}

/// Observer list with explicit subscribe/unsubscribe plus channel taps.
///
/// Callbacks run on the emitting task with no loader lock held, so they may
/// call back into the controller.
#[derive(Default)]
pub struct ProgressHub {
    inner: Mutex<HubInner>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(sid, _)| *sid != id);
        inner.callbacks.len() != before
    }

    /// Receive every subsequent event on a channel. Dropping the receiver
    /// unsubscribes it.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().channels.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.callbacks.len() + inner.channels.len()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let callbacks: Vec<Callback> = {
            let mut inner = self.inner.lock();
            inner.channels.retain(|tx| tx.send(event.clone()).is_ok());
            inner.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        tracing::trace!(session = %event.session, stage = ?event.stage, percent = event.percent, "progress");
        for callback in callbacks {
            callback(&event);
        }
    }
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
