//! Minimal scene-attachment interface and an in-memory implementation.

use crate::instance::LiveInstance;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use vetscan_common::{InstanceId, SessionId};

/// A mutation observed on the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    Attached {
        session: SessionId,
        instance: InstanceId,
    },
    Detached {
        session: SessionId,
        instance: InstanceId,
    },
    /// `old` was replaced by `new` in a single step.
    Swapped {
        session: SessionId,
        old: InstanceId,
        new: InstanceId,
    },
}

/// What the loader needs from a scene graph.
///
/// Implementations must make `swap` atomic for observers: no render may see
/// both instances or neither.
pub trait SceneGraph: Send {
    fn attach(&mut self, instance: LiveInstance);

    fn detach(&mut self, id: InstanceId) -> Option<LiveInstance>;

    /// Replace `old` with `new`, returning the detached instance. If `old` is
    /// not attached, `new` is handed back unattached as the error.
    fn swap(&mut self, old: InstanceId, new: LiveInstance) -> Result<LiveInstance, LiveInstance>;

    fn get(&self, id: InstanceId) -> Option<&LiveInstance>;

    fn get_mut(&mut self, id: InstanceId) -> Option<&mut LiveInstance>;

    fn instances(&self) -> Box<dyn Iterator<Item = &LiveInstance> + '_>;

    fn len(&self) -> usize {
        self.instances().count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scene shared between the loader and the render loop.
pub type SharedScene = Arc<Mutex<dyn SceneGraph>>;

/// Scene kept in a map, with an append-only log of every mutation.
#[derive(Debug, Default)]
pub struct InMemoryScene {
    instances: BTreeMap<InstanceId, LiveInstance>,
    events: Vec<SceneEvent>,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached instances belonging to `session`.
    pub fn count_for_session(&self, session: SessionId) -> usize {
        self.instances
            .values()
            .filter(|i| i.session() == session)
            .count()
    }

    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }
}

impl SceneGraph for InMemoryScene {
    fn attach(&mut self, instance: LiveInstance) {
        self.events.push(SceneEvent::Attached {
            session: instance.session(),
            instance: instance.id(),
        });
        self.instances.insert(instance.id(), instance);
    }

    fn detach(&mut self, id: InstanceId) -> Option<LiveInstance> {
        let instance = self.instances.remove(&id)?;
        self.events.push(SceneEvent::Detached {
            session: instance.session(),
            instance: id,
        });
        Some(instance)
    }

    fn swap(&mut self, old: InstanceId, new: LiveInstance) -> Result<LiveInstance, LiveInstance> {
        let Some(previous) = self.instances.remove(&old) else {
            return Err(new);
        };
        self.events.push(SceneEvent::Swapped {
            session: new.session(),
            old,
            new: new.id(),
        });
        self.instances.insert(new.id(), new);
        Ok(previous)
    }

    fn get(&self, id: InstanceId) -> Option<&LiveInstance> {
        self.instances.get(&id)
    }

    fn get_mut(&mut self, id: InstanceId) -> Option<&mut LiveInstance> {
        self.instances.get_mut(&id)
    }

    fn instances(&self) -> Box<dyn Iterator<Item = &LiveInstance> + '_> {
        Box::new(self.instances.values())
    }

    fn len(&self) -> usize {
        self.instances.len()
    }
}
