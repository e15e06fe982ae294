//! Per-session state as seen by callers.

use std::fmt;
use tokio::sync::watch;
use vetscan_assets::QualityLevel;
use vetscan_common::{EntityId, SessionId};

/// Load-session state machine.
///
/// `Idle -> FallbackShown -> Upgrading(level) -> ... -> Complete`, with
/// `Errored` reachable only when the lowest level fails, and `Disposed`
/// reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    FallbackShown,
    Upgrading(QualityLevel),
    Complete,
    Errored,
    Disposed,
}

impl SessionState {
    /// No further transitions except disposal.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Disposed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::FallbackShown => f.write_str("fallback shown"),
            Self::Upgrading(q) => write!(f, "upgrading to {q}"),
            Self::Complete => f.write_str("complete"),
            Self::Errored => f.write_str("errored"),
            Self::Disposed => f.write_str("disposed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Quality currently attached, `None` while the fallback is shown.
    pub displayed: Option<QualityLevel>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            displayed: None,
        }
    }
}

/// Per-call load options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Skip device heuristics and target this level.
    pub preferred_quality: Option<QualityLevel>,
    /// Override the configured deferral of upgrades.
    pub defer_upgrades: Option<bool>,
}

impl LoadOptions {
    pub fn preferred(quality: QualityLevel) -> Self {
        Self {
            preferred_quality: Some(quality),
            ..Self::default()
        }
    }
}

/// Caller's handle on a load session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    entity: EntityId,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, entity: EntityId, status: watch::Receiver<SessionStatus>) -> Self {
        Self { id, entity, status }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Resolves once a real asset is displayed or the session settles.
    pub async fn ready(&self) -> SessionStatus {
        self.wait(|s| s.displayed.is_some() || s.state.is_settled())
            .await
    }

    /// Resolves once the session is complete, errored or disposed.
    pub async fn settled(&self) -> SessionStatus {
        self.wait(|s| s.state.is_settled()).await
    }

    /// Watch every status change.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    async fn wait(&self, predicate: impl FnMut(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(predicate).await.map(|status| *status);
        reached.unwrap_or_else(|_| *rx.borrow())
    }
}
