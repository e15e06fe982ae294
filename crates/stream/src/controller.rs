//! Progressive load sessions.
//!
//! Each session attaches a procedural fallback synchronously, then walks its
//! quality chain from the lowest level up. Every successful level is swapped
//! into the scene in one step, with transform and view mode carried over and
//! the previous instance disposed.
//!
//! Lock order is `sessions -> scene -> gpu`. No lock is held across an
//! `.await` or while progress callbacks run.

use crate::config::LoaderConfig;
use crate::progress::{
    COMPLETE_PERCENT, FALLBACK_PERCENT, ProgressEvent, ProgressHub, ProgressStage, level_percent,
};
use crate::selector::{DeviceProfile, QualitySelector};
use crate::session::{LoadOptions, SessionHandle, SessionState, SessionStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use vetscan_assets::{
    AssetCache, AssetKey, AssetSource, DescriptorRegistry, EntityDescriptor, LoadedAsset,
    QualityLevel,
};
use vetscan_common::{EntityId, InstanceId, SessionId, Transform};
use vetscan_render::{
    InMemoryScene, LiveInstance, ResourceDisposer, ResourceLedger, SharedGpu, SharedScene,
    ViewMode, VisualizationError, VisualizationStateManager,
};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("load sessions need a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Visualization(#[from] VisualizationError),
}

/// Why a fetched level was not swapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The session was disposed while the level was in flight.
    Disposed,
    /// An equal or higher quality is already displayed.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelOutcome {
    Applied,
    Failed,
    Skipped,
    /// The session is gone; stop walking the chain.
    Stopped,
}

struct SessionSlot {
    entity: EntityId,
    current: InstanceId,
    displayed: Option<QualityLevel>,
    last_percent: u8,
    started: Instant,
    status: watch::Sender<SessionStatus>,
    background: Option<JoinHandle<()>>,
}

/// Snapshot of loader-wide counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderStats {
    pub active_sessions: usize,
    pub cached_assets: usize,
    pub in_flight: usize,
    pub live_gpu_resources: usize,
    /// GPU memory estimate for the configured device tier.
    pub max_memory_mb: u32,
    /// Time from session start to completion, last value per entity.
    pub load_times: BTreeMap<EntityId, Duration>,
}

impl fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sessions: {}, cached assets: {}, in flight: {}, live GPU resources: {}, memory limit: {}MB",
            self.active_sessions,
            self.cached_assets,
            self.in_flight,
            self.live_gpu_resources,
            self.max_memory_mb
        )?;
        for (entity, elapsed) in &self.load_times {
            writeln!(f, "  {entity} loaded in {:.2}s", elapsed.as_secs_f64())?;
        }
        Ok(())
    }
}

struct Inner {
    registry: DescriptorRegistry,
    cache: AssetCache,
    source: Arc<dyn AssetSource>,
    selector: QualitySelector,
    device: DeviceProfile,
    visualization: VisualizationStateManager,
    disposer: ResourceDisposer,
    scene: SharedScene,
    gpu: SharedGpu,
    progress: ProgressHub,
    config: LoaderConfig,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    load_times: Mutex<BTreeMap<EntityId, Duration>>,
}

/// Assembles a [`ProgressiveLoadController`]. Anything not supplied gets an
/// in-memory default.
pub struct ControllerBuilder {
    registry: DescriptorRegistry,
    source: Arc<dyn AssetSource>,
    config: LoaderConfig,
    device: DeviceProfile,
    cache: Option<AssetCache>,
    scene: Option<SharedScene>,
    gpu: Option<SharedGpu>,
    visualization: Option<VisualizationStateManager>,
}

impl ControllerBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    pub fn cache(mut self, cache: AssetCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn scene(mut self, scene: SharedScene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn gpu(mut self, gpu: SharedGpu) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn visualization(mut self, manager: VisualizationStateManager) -> Self {
        self.visualization = Some(manager);
        self
    }

    pub fn build(self) -> ProgressiveLoadController {
        let gpu: SharedGpu = match self.gpu {
            Some(gpu) => gpu,
            None => ResourceLedger::shared(),
        };
        let scene: SharedScene = match self.scene {
            Some(scene) => scene,
            None => Arc::new(Mutex::new(InMemoryScene::new())),
        };
        ProgressiveLoadController {
            inner: Arc::new(Inner {
                registry: self.registry,
                cache: self.cache.unwrap_or_default(),
                source: self.source,
                selector: QualitySelector::new(self.config.selector.clone()),
                device: self.device,
                visualization: self.visualization.unwrap_or_default(),
                disposer: ResourceDisposer::new(Arc::clone(&gpu)),
                scene,
                gpu,
                progress: ProgressHub::new(),
                config: self.config,
                sessions: Mutex::new(HashMap::new()),
                load_times: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

/// Orchestrates load sessions. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ProgressiveLoadController {
    inner: Arc<Inner>,
}

impl ProgressiveLoadController {
    pub fn builder(registry: DescriptorRegistry, source: Arc<dyn AssetSource>) -> ControllerBuilder {
        ControllerBuilder {
            registry,
            source,
            config: LoaderConfig::default(),
            device: DeviceProfile::default(),
            cache: None,
            scene: None,
            gpu: None,
            visualization: None,
        }
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &AssetCache {
        &self.inner.cache
    }

    pub fn scene(&self) -> &SharedScene {
        &self.inner.scene
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.inner.progress
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.inner.device
    }

    pub fn visualization(&self) -> &VisualizationStateManager {
        &self.inner.visualization
    }

    /// Start a session for `entity`.
    ///
    /// The fallback instance is attached and reported before this returns;
    /// fetching continues on a spawned task. Outside a tokio runtime this
    /// fails with [`LoadError::NoRuntime`] before anything is attached.
    pub fn start_session(
        &self,
        entity: impl Into<EntityId>,
        options: LoadOptions,
    ) -> Result<SessionHandle, LoadError> {
        let entity = entity.into();
        let inner = &self.inner;
        let descriptor = inner
            .registry
            .get(&entity)
            .cloned()
            .ok_or_else(|| LoadError::UnknownEntity(entity.clone()))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LoadError::NoRuntime)?;
        let chain = inner
            .selector
            .select_chain(&descriptor, &inner.device, options.preferred_quality);
        let defer = options.defer_upgrades.unwrap_or(inner.config.defer_upgrades);

        let session = SessionId::new();
        let span = tracing::info_span!("load_session", entity = %entity, %session);
        let _guard = span.enter();
        let started = Instant::now();

        let fallback = LiveInstance::fallback(session, &descriptor, &mut *inner.gpu.lock());
        let (status, rx) = watch::channel(SessionStatus::default());
        {
            let mut sessions = inner.sessions.lock();
            let mut scene = inner.scene.lock();
            let current = fallback.id();
            scene.attach(fallback);
            status.send_modify(|s| s.state = SessionState::FallbackShown);
            sessions.insert(
                session,
                SessionSlot {
                    entity: entity.clone(),
                    current,
                    displayed: None,
                    last_percent: FALLBACK_PERCENT,
                    started,
                    status,
                    background: None,
                },
            );
        }
        tracing::info!(?chain, defer, "fallback attached");
        self.emit(session, ProgressStage::Fallback, Some(FALLBACK_PERCENT));

        runtime.spawn(
            self.clone()
                .run_chain(session, Arc::new(descriptor), chain, defer)
                .instrument(span.clone()),
        );
        Ok(SessionHandle::new(session, entity, rx))
    }

    /// Start a session and wait until a real asset is displayed or the
    /// session settles.
    pub async fn load(
        &self,
        entity: impl Into<EntityId>,
        options: LoadOptions,
    ) -> Result<SessionHandle, LoadError> {
        let handle = self.start_session(entity, options)?;
        handle.ready().await;
        Ok(handle)
    }

    async fn run_chain(
        self,
        session: SessionId,
        descriptor: Arc<EntityDescriptor>,
        chain: Vec<QualityLevel>,
        defer: bool,
    ) {
        let len = chain.len();
        for (index, quality) in chain.iter().copied().enumerate() {
            match self.load_level(session, &descriptor, quality, index, len).await {
                LevelOutcome::Applied if defer && index + 1 < len => {
                    let background = tokio::spawn(
                        self.clone()
                            .run_background(session, Arc::clone(&descriptor), chain.clone(), index + 1)
                            .instrument(tracing::Span::current()),
                    );
                    self.store_background(session, background);
                    return;
                }
                LevelOutcome::Applied | LevelOutcome::Skipped => {}
                LevelOutcome::Failed if index == 0 => {
                    self.finish(session, SessionState::Errored);
                    return;
                }
                LevelOutcome::Failed => {}
                LevelOutcome::Stopped => return,
            }
        }
        self.finish(session, SessionState::Complete);
    }

    /// Deferred upgrades: each remaining level waits the configured delay.
    async fn run_background(
        self,
        session: SessionId,
        descriptor: Arc<EntityDescriptor>,
        chain: Vec<QualityLevel>,
        start: usize,
    ) {
        let delay = self.inner.config.background_upgrade_delay();
        let len = chain.len();
        for (index, quality) in chain.iter().copied().enumerate().skip(start) {
            tokio::time::sleep(delay).await;
            let outcome = self.load_level(session, &descriptor, quality, index, len).await;
            if outcome == LevelOutcome::Stopped {
                return;
            }
        }
        self.finish(session, SessionState::Complete);
    }

    async fn load_level(
        &self,
        session: SessionId,
        descriptor: &EntityDescriptor,
        quality: QualityLevel,
        index: usize,
        len: usize,
    ) -> LevelOutcome {
        if !self.set_state(session, SessionState::Upgrading(quality)) {
            return LevelOutcome::Stopped;
        }

        let key = AssetKey::new(descriptor.id.clone(), quality);
        let path = descriptor.asset_path(quality);
        let source = Arc::clone(&self.inner.source);
        let fetch_key = key.clone();
        let result = self
            .inner
            .cache
            .get_or_fetch(key.clone(), move || async move {
                let started = Instant::now();
                let raw = source.fetch(&path).await?;
                LoadedAsset::decode(fetch_key, &raw, started.elapsed())
            })
            .await;

        match result {
            Ok(asset) => match self.apply_upgrade(session, descriptor, asset) {
                ApplyOutcome::Applied => {
                    if index + 1 < len {
                        let percent = level_percent(index, len);
                        self.emit(session, ProgressStage::Loaded(quality), Some(percent));
                    }
                    LevelOutcome::Applied
                }
                ApplyOutcome::Discarded(DiscardReason::Disposed) => LevelOutcome::Stopped,
                ApplyOutcome::Discarded(DiscardReason::Stale) => LevelOutcome::Skipped,
            },
            Err(err) => {
                tracing::warn!(%key, error = %err, "quality level failed");
                if self.emit(session, ProgressStage::Failed(quality), None) {
                    LevelOutcome::Failed
                } else {
                    LevelOutcome::Stopped
                }
            }
        }
    }

    /// Swap `asset` into the session's scene slot, carrying over transform,
    /// user data and view mode, and dispose the replaced instance.
    fn apply_upgrade(
        &self,
        session: SessionId,
        descriptor: &EntityDescriptor,
        asset: Arc<LoadedAsset>,
    ) -> ApplyOutcome {
        let inner = &self.inner;
        let quality = asset.quality();
        let mut sessions = inner.sessions.lock();
        let Some(slot) = sessions.get_mut(&session) else {
            tracing::debug!(%quality, "result for disposed session discarded");
            return ApplyOutcome::Discarded(DiscardReason::Disposed);
        };
        if slot.displayed.is_some_and(|shown| shown >= quality) {
            tracing::debug!(%quality, displayed = ?slot.displayed, "stale result discarded");
            return ApplyOutcome::Discarded(DiscardReason::Stale);
        }

        let mut scene = inner.scene.lock();
        let mut replacement =
            LiveInstance::from_asset(session, descriptor, asset, &mut *inner.gpu.lock());
        if let Some(current) = scene.get(slot.current) {
            if let Err(err) = inner.visualization.carry_over(current, &mut replacement) {
                tracing::warn!(error = %err, "view mode not re-applied after swap");
            }
        }

        let new_id = replacement.id();
        match scene.swap(slot.current, replacement) {
            Ok(mut previous) => {
                drop(scene);
                inner.disposer.dispose(&mut previous);
                slot.current = new_id;
                slot.displayed = Some(quality);
                slot.status.send_modify(|s| s.displayed = Some(quality));
                tracing::info!(%quality, instance = %new_id, "quality swapped in");
                ApplyOutcome::Applied
            }
            Err(mut orphan) => {
                drop(scene);
                inner.disposer.dispose(&mut orphan);
                tracing::warn!(%quality, "session instance missing from scene, result discarded");
                ApplyOutcome::Discarded(DiscardReason::Disposed)
            }
        }
    }

    /// Returns `false` if the session no longer exists.
    fn set_state(&self, session: SessionId, state: SessionState) -> bool {
        match self.inner.sessions.lock().get(&session) {
            Some(slot) => {
                slot.status.send_modify(|s| s.state = state);
                true
            }
            None => false,
        }
    }

    fn store_background(&self, session: SessionId, task: JoinHandle<()>) {
        match self.inner.sessions.lock().get_mut(&session) {
            Some(slot) => slot.background = Some(task),
            None => task.abort(),
        }
    }

    fn finish(&self, session: SessionId, state: SessionState) {
        let (stage, percent) = match state {
            SessionState::Complete => (ProgressStage::Complete, Some(COMPLETE_PERCENT)),
            _ => (ProgressStage::Errored, None),
        };
        let completed = {
            let sessions = self.inner.sessions.lock();
            let Some(slot) = sessions.get(&session) else {
                return;
            };
            slot.status.send_modify(|s| s.state = state);
            (slot.entity.clone(), slot.started.elapsed())
        };

        if state == SessionState::Complete {
            let (entity, elapsed) = completed;
            tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "session complete");
            self.inner.load_times.lock().insert(entity, elapsed);
        } else {
            tracing::warn!("lowest quality failed, keeping fallback");
        }
        self.emit(session, stage, percent);
    }

    /// Emit a progress event; `None` repeats the last percent. Returns
    /// `false` without emitting if the session no longer exists.
    fn emit(&self, session: SessionId, stage: ProgressStage, percent: Option<u8>) -> bool {
        let event = {
            let mut sessions = self.inner.sessions.lock();
            let Some(slot) = sessions.get_mut(&session) else {
                return false;
            };
            let percent = percent.unwrap_or(slot.last_percent);
            slot.last_percent = percent;
            ProgressEvent {
                session,
                entity: slot.entity.clone(),
                stage,
                percent,
                elapsed: slot.started.elapsed(),
                at: SystemTime::now(),
            }
        };
        self.inner.progress.emit(event);
        true
    }

    /// Tear down a session: cancel deferred upgrades, detach and dispose its
    /// instance. In-flight fetches still complete into the cache. Returns
    /// `false` if the session was already disposed.
    pub fn dispose(&self, session: SessionId) -> bool {
        let removed = self.inner.sessions.lock().remove(&session);
        let Some(slot) = removed else {
            tracing::debug!(%session, "dispose of unknown session ignored");
            return false;
        };

        if let Some(task) = &slot.background {
            task.abort();
        }
        let detached = self.inner.scene.lock().detach(slot.current);
        let released = match detached {
            Some(mut instance) => self.inner.disposer.dispose(&mut instance),
            None => 0,
        };
        slot.status.send_modify(|s| s.state = SessionState::Disposed);
        tracing::info!(%session, entity = %slot.entity, released, "session disposed");
        true
    }

    /// Dispose every session and empty the asset cache.
    pub fn clear_cache(&self) -> usize {
        let sessions: Vec<SessionId> = self.inner.sessions.lock().keys().copied().collect();
        let disposed = sessions.into_iter().filter(|s| self.dispose(*s)).count();
        self.inner.cache.clear();
        tracing::info!(disposed, "asset cache cleared");
        disposed
    }

    /// Run `f` on the session's current instance.
    pub fn with_current<R>(
        &self,
        session: SessionId,
        f: impl FnOnce(&LiveInstance) -> R,
    ) -> Result<R, LoadError> {
        let sessions = self.inner.sessions.lock();
        let slot = sessions
            .get(&session)
            .ok_or(LoadError::SessionNotFound(session))?;
        let scene = self.inner.scene.lock();
        let instance = scene
            .get(slot.current)
            .ok_or(LoadError::SessionNotFound(session))?;
        Ok(f(instance))
    }

    fn with_current_mut<R>(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut LiveInstance) -> R,
    ) -> Result<R, LoadError> {
        let sessions = self.inner.sessions.lock();
        let slot = sessions
            .get(&session)
            .ok_or(LoadError::SessionNotFound(session))?;
        let mut scene = self.inner.scene.lock();
        let instance = scene
            .get_mut(slot.current)
            .ok_or(LoadError::SessionNotFound(session))?;
        Ok(f(instance))
    }

    /// Switch the session's view mode. It survives every later upgrade.
    pub fn apply_mode(&self, session: SessionId, mode: ViewMode) -> Result<(), LoadError> {
        let visualization = &self.inner.visualization;
        self.with_current_mut(session, |instance| visualization.apply_mode(instance, mode))?
            .map_err(LoadError::from)
    }

    /// Same as [`apply_mode`](Self::apply_mode) for a string key. An unknown
    /// key leaves the current mode in place.
    pub fn apply_mode_key(&self, session: SessionId, key: &str) -> Result<ViewMode, LoadError> {
        let visualization = &self.inner.visualization;
        self.with_current_mut(session, |instance| visualization.apply_mode_key(instance, key))?
            .map_err(LoadError::from)
    }

    pub fn set_transform(&self, session: SessionId, transform: Transform) -> Result<(), LoadError> {
        self.with_current_mut(session, |instance| instance.transform = transform)
    }

    pub fn set_user_data(
        &self,
        session: SessionId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), LoadError> {
        let (key, value) = (key.into(), value.into());
        self.with_current_mut(session, |instance| {
            instance.user_data.insert(key, value);
        })
    }

    pub fn session_status(&self, session: SessionId) -> Option<SessionStatus> {
        self.inner
            .sessions
            .lock()
            .get(&session)
            .map(|slot| *slot.status.borrow())
    }

    /// Advance mode animations on every live instance.
    pub fn tick(&self, time: f32) {
        let sessions = self.inner.sessions.lock();
        let mut scene = self.inner.scene.lock();
        for slot in sessions.values() {
            if let Some(instance) = scene.get_mut(slot.current) {
                self.inner.visualization.tick(instance, time);
            }
        }
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            active_sessions: self.inner.sessions.lock().len(),
            cached_assets: self.inner.cache.len(),
            in_flight: self.inner.cache.in_flight(),
            live_gpu_resources: self.inner.gpu.lock().live_count(),
            max_memory_mb: self.inner.device.gpu_tier.memory_mb(),
            load_times: self.inner.load_times.lock().clone(),
        }
    }
}

impl fmt::Debug for ProgressiveLoadController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressiveLoadController")
            .field("entities", &self.inner.registry.len())
            .field("sessions", &self.inner.sessions.lock().len())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::GpuTier;
    use futures::future::{BoxFuture, FutureExt};
    use glam::Vec3;
    use std::collections::HashSet;
    use tokio::sync::{Notify, mpsc};
    use vetscan_assets::{FetchError, RawAsset, placeholder_glb};
    use vetscan_render::{BlendMode, GpuResources, SceneEvent, SceneGraph};

    #[derive(Default)]
    struct MockSource {
        assets: Mutex<HashMap<String, Vec<u8>>>,
        failing: Mutex<HashSet<String>>,
        gates: Mutex<HashMap<String, Arc<Notify>>>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl MockSource {
        fn with_entities(registry: &DescriptorRegistry, ids: &[&str]) -> Arc<Self> {
            let source = Self::default();
            for id in ids {
                let descriptor = registry.get(&EntityId::from(*id)).unwrap();
                for quality in QualityLevel::ALL {
                    source.assets.lock().insert(
                        descriptor.asset_path(quality),
                        placeholder_glb(id, quality, quality.profile().vertex_budget / 100),
                    );
                }
            }
            Arc::new(source)
        }

        fn fail(&self, path: String) {
            self.failing.lock().insert(path);
        }

        fn gate(&self, path: String) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates.lock().insert(path, Arc::clone(&gate));
            gate
        }

        fn calls(&self, path: &str) -> usize {
            self.calls.lock().get(path).copied().unwrap_or(0)
        }
    }

    impl AssetSource for MockSource {
        fn fetch(&self, path: &str) -> BoxFuture<'static, Result<RawAsset, FetchError>> {
            *self.calls.lock().entry(path.to_string()).or_default() += 1;
            let bytes = self.assets.lock().get(path).cloned();
            let fails = self.failing.lock().contains(path);
            let gate = self.gates.lock().get(path).cloned();
            let path = path.to_string();
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if fails {
                    return Err(FetchError::Io {
                        path,
                        reason: "simulated network error".into(),
                    });
                }
                match bytes {
                    Some(bytes) => Ok(RawAsset { path, bytes }),
                    None => Err(FetchError::NotFound(path)),
                }
            }
            .boxed()
        }
    }

    struct Fixture {
        controller: ProgressiveLoadController,
        source: Arc<MockSource>,
        scene: Arc<Mutex<InMemoryScene>>,
        ledger: Arc<Mutex<ResourceLedger>>,
    }

    impl Fixture {
        fn path(&self, id: &str, quality: QualityLevel) -> String {
            self.controller
                .registry()
                .get(&EntityId::from(id))
                .unwrap()
                .asset_path(quality)
        }
    }

    fn fixture(device: DeviceProfile) -> Fixture {
        let registry = DescriptorRegistry::builtin();
        let source = MockSource::with_entities(&registry, &["dog", "cat"]);
        let scene = Arc::new(Mutex::new(InMemoryScene::new()));
        let ledger = ResourceLedger::shared();
        let controller = ProgressiveLoadController::builder(registry, source.clone())
            .device(device)
            .scene(scene.clone())
            .gpu(ledger.clone())
            .build();
        Fixture {
            controller,
            source,
            scene,
            ledger,
        }
    }

    fn workstation() -> DeviceProfile {
        DeviceProfile::new(2560, 1440, 2.0, GpuTier::Dedicated)
    }

    fn phone() -> DeviceProfile {
        DeviceProfile::new(800, 600, 1.0, GpuTier::Mobile)
    }

    fn foreground(quality: QualityLevel) -> LoadOptions {
        LoadOptions {
            preferred_quality: Some(quality),
            defer_upgrades: Some(false),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn run_pending_tasks() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn swaps(events: &[SceneEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SceneEvent::Swapped { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn low_end_device_loads_single_level() {
        let f = fixture(phone());
        let mut rx = f.controller.progress().channel();

        let handle = f.controller.start_session("dog", LoadOptions::default()).unwrap();
        let status = handle.settled().await;

        assert_eq!(status.state, SessionState::Complete);
        assert_eq!(status.displayed, Some(QualityLevel::Mobile));
        let percents: Vec<u8> = drain(&mut rx).iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 100]);
        assert_eq!(f.scene.lock().count_for_session(handle.id()), 1);
        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Tablet)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_chain_swaps_three_times_and_keeps_transform() {
        let f = fixture(workstation());
        let mut rx = f.controller.progress().channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let controller = f.controller.clone();
            let scene = f.scene.clone();
            let seen = Arc::clone(&seen);
            f.controller.progress().subscribe(move |event| {
                let attached = scene.lock().count_for_session(event.session);
                if let Ok(transform) = controller.with_current(event.session, |i| i.transform) {
                    seen.lock().push((attached, transform));
                }
            });
        }

        let handle = f
            .controller
            .start_session("dog", LoadOptions::preferred(QualityLevel::Desktop))
            .unwrap();
        let placed = Transform {
            position: Vec3::new(1.0, 0.5, -2.0),
            ..Transform::uniform_scale(1.0)
        };
        f.controller.set_transform(handle.id(), placed).unwrap();

        let status = handle.settled().await;
        assert_eq!(status.state, SessionState::Complete);
        assert_eq!(status.displayed, Some(QualityLevel::Desktop));

        let events = f.scene.lock().drain_events();
        assert_eq!(swaps(&events), 3);
        assert_eq!(f.scene.lock().count_for_session(handle.id()), 1);

        let percents: Vec<u8> = drain(&mut rx).iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 20, 55, 100]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|(attached, _)| *attached == 1));
        assert!(seen[1..].iter().all(|(_, t)| *t == placed));
        assert_eq!(
            f.controller.with_current(handle.id(), |i| i.transform).unwrap(),
            placed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_upgrade_waits_for_configured_delay() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .start_session("dog", LoadOptions::preferred(QualityLevel::Tablet))
            .unwrap();
        let started = Instant::now();

        assert_eq!(handle.ready().await.displayed, Some(QualityLevel::Mobile));
        handle.settled().await;
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn view_mode_survives_background_upgrade() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .start_session("dog", LoadOptions::preferred(QualityLevel::Desktop))
            .unwrap();

        assert_eq!(handle.ready().await.displayed, Some(QualityLevel::Mobile));
        f.controller.apply_mode(handle.id(), ViewMode::Xray).unwrap();
        handle.settled().await;

        let (mode, quality, blend) = f
            .controller
            .with_current(handle.id(), |i| {
                (i.active_mode(), i.quality(), i.materials()[0].blend)
            })
            .unwrap();
        assert_eq!(mode, ViewMode::Xray);
        assert_eq!(quality, Some(QualityLevel::Desktop));
        assert_eq!(blend, BlendMode::Additive);
    }

    #[tokio::test(start_paused = true)]
    async fn lowest_level_failure_keeps_fallback() {
        let f = fixture(workstation());
        f.source.fail(f.path("dog", QualityLevel::Mobile));
        let mut rx = f.controller.progress().channel();

        let handle = f
            .controller
            .start_session("dog", LoadOptions::preferred(QualityLevel::Tablet))
            .unwrap();
        let status = handle.settled().await;

        assert_eq!(status.state, SessionState::Errored);
        assert_eq!(status.displayed, None);
        assert!(f.controller.with_current(handle.id(), |i| i.is_fallback()).unwrap());
        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Tablet)), 0);

        let stages: Vec<ProgressStage> = drain(&mut rx).iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                ProgressStage::Fallback,
                ProgressStage::Failed(QualityLevel::Mobile),
                ProgressStage::Errored
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn later_level_failure_is_skipped() {
        let f = fixture(workstation());
        f.source.fail(f.path("dog", QualityLevel::Tablet));
        let mut rx = f.controller.progress().channel();

        let handle = f
            .controller
            .start_session("dog", foreground(QualityLevel::Desktop))
            .unwrap();
        let status = handle.settled().await;

        assert_eq!(status.state, SessionState::Complete);
        assert_eq!(status.displayed, Some(QualityLevel::Desktop));
        let stages: Vec<ProgressStage> = drain(&mut rx).iter().map(|e| e.stage).collect();
        assert!(stages.contains(&ProgressStage::Failed(QualityLevel::Tablet)));
        assert_eq!(stages.last(), Some(&ProgressStage::Complete));
        assert!(!f.controller.cache().contains(&AssetKey::new("dog", QualityLevel::Tablet)));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_during_deferred_fetch_leaves_scene_untouched() {
        let f = fixture(workstation());
        let gate = f.source.gate(f.path("dog", QualityLevel::Tablet));
        let handle = f
            .controller
            .start_session("dog", LoadOptions::preferred(QualityLevel::Tablet))
            .unwrap();
        assert_eq!(handle.ready().await.displayed, Some(QualityLevel::Mobile));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.controller.cache().in_flight(), 1);
        f.scene.lock().drain_events();

        assert!(f.controller.dispose(handle.id()));
        gate.notify_one();
        run_pending_tasks().await;

        let tablet = AssetKey::new("dog", QualityLevel::Tablet);
        assert!(f.controller.cache().contains(&tablet));
        let events = f.scene.lock().drain_events();
        assert_eq!(
            events
                .iter()
                .filter(|e| !matches!(e, SceneEvent::Detached { .. }))
                .count(),
            0
        );
        assert_eq!(f.ledger.lock().live_count(), 0);
        assert_eq!(handle.status().state, SessionState::Disposed);
    }

    #[tokio::test(start_paused = true)]
    async fn result_arriving_after_dispose_is_discarded() {
        let f = fixture(workstation());
        let gate = f.source.gate(f.path("dog", QualityLevel::Tablet));
        let handle = f
            .controller
            .start_session("dog", foreground(QualityLevel::Tablet))
            .unwrap();
        handle.ready().await;
        run_pending_tasks().await;
        assert_eq!(f.controller.cache().in_flight(), 1);

        assert!(f.controller.dispose(handle.id()));
        f.scene.lock().drain_events();
        gate.notify_one();
        run_pending_tasks().await;

        assert!(f.controller.cache().contains(&AssetKey::new("dog", QualityLevel::Tablet)));
        assert!(f.scene.lock().drain_events().is_empty());
        assert_eq!(f.ledger.lock().live_count(), 0);
        assert!(f.scene.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sessions_share_fetches() {
        let f = fixture(workstation());
        let a = f
            .controller
            .start_session("dog", foreground(QualityLevel::Tablet))
            .unwrap();
        let b = f
            .controller
            .start_session("dog", foreground(QualityLevel::Tablet))
            .unwrap();

        a.settled().await;
        b.settled().await;
        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Mobile)), 1);
        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Tablet)), 1);
        assert_eq!(f.scene.lock().len(), 2);

        let id_a = f.controller.with_current(a.id(), |i| i.id()).unwrap();
        let id_b = f.controller.with_current(b.id(), |i| i.id()).unwrap();
        assert_ne!(id_a, id_b);
    }

    #[tokio::test(start_paused = true)]
    async fn same_entity_sessions_keep_independent_targets_and_modes() {
        let f = fixture(workstation());
        let low = f
            .controller
            .start_session("dog", foreground(QualityLevel::Mobile))
            .unwrap();
        let high = f
            .controller
            .start_session("dog", foreground(QualityLevel::Pro))
            .unwrap();
        f.controller.apply_mode(high.id(), ViewMode::Thermal).unwrap();

        let low_status = low.settled().await;
        let high_status = high.settled().await;
        assert_eq!(low_status.state, SessionState::Complete);
        assert_eq!(low_status.displayed, Some(QualityLevel::Mobile));
        assert_eq!(high_status.state, SessionState::Complete);
        assert_eq!(high_status.displayed, Some(QualityLevel::Pro));

        let low_mode = f.controller.with_current(low.id(), |i| i.active_mode()).unwrap();
        let high_mode = f.controller.with_current(high.id(), |i| i.active_mode()).unwrap();
        assert_eq!(low_mode, ViewMode::Normal);
        assert_eq!(high_mode, ViewMode::Thermal);

        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Mobile)), 1);
        assert_eq!(f.source.calls(&f.path("dog", QualityLevel::Pro)), 1);
        assert_eq!(f.scene.lock().count_for_session(low.id()), 1);
        assert_eq!(f.scene.lock().count_for_session(high.id()), 1);
    }

    #[test]
    fn start_without_runtime_attaches_nothing() {
        let f = fixture(workstation());
        let err = f
            .controller
            .start_session("dog", LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::NoRuntime));
        assert!(f.scene.lock().is_empty());
        assert_eq!(f.ledger.lock().live_count(), 0);
        assert_eq!(f.controller.stats().active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lower_quality_after_higher_is_stale() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .start_session("dog", foreground(QualityLevel::Desktop))
            .unwrap();
        handle.settled().await;
        f.scene.lock().drain_events();

        let dog = f.controller.registry().get(&EntityId::from("dog")).unwrap().clone();
        let mobile = f
            .controller
            .cache()
            .get(&AssetKey::new("dog", QualityLevel::Mobile))
            .unwrap();
        let outcome = f.controller.apply_upgrade(handle.id(), &dog, mobile);

        assert_eq!(outcome, ApplyOutcome::Discarded(DiscardReason::Stale));
        assert!(f.scene.lock().drain_events().is_empty());
        assert_eq!(
            f.controller.session_status(handle.id()).unwrap().displayed,
            Some(QualityLevel::Desktop)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_is_idempotent() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .start_session("cat", foreground(QualityLevel::Tablet))
            .unwrap();
        handle.settled().await;
        assert!(f.ledger.lock().live_count() > 0);

        assert!(f.controller.dispose(handle.id()));
        assert!(!f.controller.dispose(handle.id()));
        assert_eq!(f.ledger.lock().live_count(), 0);
        assert!(matches!(
            f.controller.apply_mode(handle.id(), ViewMode::Mri),
            Err(LoadError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_entity_is_rejected() {
        let f = fixture(workstation());
        let err = f
            .controller
            .start_session("unicorn", LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::UnknownEntity(id) if id.as_str() == "unicorn"));
        assert!(f.scene.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_mode_key_keeps_current_mode() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .load("cat", foreground(QualityLevel::Mobile))
            .await
            .unwrap();
        assert_eq!(f.controller.apply_mode_key(handle.id(), "thermal").unwrap(), ViewMode::Thermal);

        let err = f.controller.apply_mode_key(handle.id(), "sonar").unwrap_err();
        assert!(matches!(err, LoadError::Visualization(VisualizationError::UnknownMode(_))));
        let mode = f.controller.with_current(handle.id(), |i| i.active_mode()).unwrap();
        assert_eq!(mode, ViewMode::Thermal);
    }

    #[tokio::test(start_paused = true)]
    async fn user_data_is_carried_to_replacements() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .start_session("dog", foreground(QualityLevel::Desktop))
            .unwrap();
        f.controller
            .set_user_data(handle.id(), "patient", "Rex")
            .unwrap();
        handle.settled().await;

        let patient = f
            .controller
            .with_current(handle.id(), |i| i.user_data.get("patient").cloned())
            .unwrap();
        assert_eq!(patient.as_deref(), Some("Rex"));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_animates_active_mode() {
        let f = fixture(workstation());
        let handle = f
            .controller
            .load("dog", foreground(QualityLevel::Mobile))
            .await
            .unwrap();
        f.controller.apply_mode(handle.id(), ViewMode::Xray).unwrap();
        f.controller.tick(1.5);

        let time = f
            .controller
            .with_current(handle.id(), |i| i.materials()[0].uniform("time"))
            .unwrap();
        assert_eq!(time, Some(1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cache_disposes_everything() {
        let f = fixture(workstation());
        let a = f
            .controller
            .start_session("dog", foreground(QualityLevel::Tablet))
            .unwrap();
        let b = f
            .controller
            .start_session("cat", foreground(QualityLevel::Mobile))
            .unwrap();
        a.settled().await;
        b.settled().await;

        let before = f.controller.stats();
        assert_eq!(before.active_sessions, 2);
        assert_eq!(before.cached_assets, 3);
        assert!(before.load_times.contains_key(&EntityId::from("dog")));
        assert!(before.to_string().contains("dog loaded in"));
        assert_eq!(before.max_memory_mb, 2048);

        assert_eq!(f.controller.clear_cache(), 2);
        let after = f.controller.stats();
        assert_eq!(after.active_sessions, 0);
        assert_eq!(after.cached_assets, 0);
        assert_eq!(after.live_gpu_resources, 0);
        assert!(f.scene.lock().is_empty());
        assert_eq!(a.status().state, SessionState::Disposed);
    }
}
