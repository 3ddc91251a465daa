//! Selection Service
//!
//! Publishes and fetches data through one selection (CLIPBOARD, PRIMARY or
//! SECONDARY) of a windowing server.
//!
//! # Architecture
//!
//! ```text
//! caller threads                 SelectionService
//! ━━━━━━━━━━━━━━                 ━━━━━━━━━━━━━━━━
//!
//! get() ──lock──> GetterAgent ──Fetch──> getter thread ── connection A
//!
//! set()   ─┐
//! clear() ─┼lock──> SetterAgent ──Set/Clear/Store──> setter thread ── connection B
//! store() ─┘             ▲                                 │
//!                        │                            FaultNotice
//!                        └──── recreate + replay ──── Supervisor thread
//! ```
//!
//! Each agent owns its own connection. Transport failures tear the agent
//! down: `get` retries once on a fresh getter; the setter is rebuilt and the
//! last declared content is re-declared, either by the failing caller or, if
//! the failure happened while serving requests, by the supervisor.

use crate::config::SelectionConfig;
use crate::content::{ContentMap, SelectionData};
use crate::error::{
    recovery_action, AgentRole, ErrorContext, RecoveryAction, Result, SelectionError,
    TransportError,
};
use crate::transport::Transport;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod getter;
mod setter;
mod supervisor;

use getter::GetterAgent;
use setter::{FaultNotice, SetterAgent};
use supervisor::Supervisor;

/// One of the independent selection buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    /// Explicit copy/paste buffer
    #[default]
    Clipboard,
    /// Current highlight
    Primary,
    /// Rarely used third buffer
    Secondary,
}

impl SelectionKind {
    /// Every selection kind
    pub const ALL: [SelectionKind; 3] = [Self::Clipboard, Self::Primary, Self::Secondary];

    /// Server-side name of the selection
    pub fn atom_name(&self) -> &'static str {
        match self {
            Self::Clipboard => "CLIPBOARD",
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clipboard => write!(f, "clipboard"),
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Wait for a worker's answer
pub(crate) fn await_reply<T>(response_rx: &Receiver<Result<T>>, timeout: Duration) -> Result<T> {
    match response_rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SelectionError::Timeout(timeout.as_millis() as u64)),
        Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected.into()),
    }
}

/// Setter agent plus the content it should be declaring
struct SetterSlot {
    agent: SetterAgent,
    last_content: Option<Arc<ContentMap>>,
}

/// State shared between callers and the supervisor
struct ServiceShared {
    transport: Arc<dyn Transport>,
    kind: SelectionKind,
    config: SelectionConfig,
    generations: AtomicU64,
    fault_tx: Sender<FaultNotice>,
    getter: Mutex<GetterAgent>,
    setter: Mutex<SetterSlot>,
}

impl ServiceShared {
    fn next_generation(generations: &AtomicU64) -> u64 {
        generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn spawn_getter(
        transport: &dyn Transport,
        kind: SelectionKind,
        config: &SelectionConfig,
        generation: u64,
    ) -> Result<GetterAgent> {
        let conn = transport.connect(&format!("{}-getter", config.client_name))?;
        GetterAgent::spawn(conn, kind, config, generation)
    }

    fn spawn_setter(
        transport: &dyn Transport,
        kind: SelectionKind,
        config: &SelectionConfig,
        generation: u64,
        fault_tx: Sender<FaultNotice>,
    ) -> Result<SetterAgent> {
        let conn = transport.connect(&format!("{}-setter", config.client_name))?;
        SetterAgent::spawn(conn, kind, config, generation, fault_tx)
    }

    fn recreate_getter(&self) -> Result<GetterAgent> {
        Self::spawn_getter(
            &*self.transport,
            self.kind,
            &self.config,
            Self::next_generation(&self.generations),
        )
    }

    /// Swap in a fresh setter; the old one is shut down before returning
    fn recreate_setter(&self, slot: &mut SetterSlot) -> Result<()> {
        let agent = Self::spawn_setter(
            &*self.transport,
            self.kind,
            &self.config,
            Self::next_generation(&self.generations),
            self.fault_tx.clone(),
        )?;
        let old = std::mem::replace(&mut slot.agent, agent);
        drop(old);

        debug!("Setter for {} is now agent {}", self.kind, slot.agent.generation());
        Ok(())
    }

    /// Re-declare the last content on the current setter
    fn replay(&self, slot: &SetterSlot) -> Result<()> {
        match &slot.last_content {
            Some(content) => {
                info!("Replaying {} targets on {}", content.len(), self.kind);
                slot.agent.set(Arc::clone(content))
            }
            None => Ok(()),
        }
    }

    /// Rebuild a setter that died while serving requests
    fn recover_setter(&self, notice: FaultNotice) {
        let mut slot = self.setter.lock();
        if slot.agent.generation() != notice.generation {
            debug!("Ignoring fault from retired setter {}", notice.generation);
            return;
        }

        warn!(
            "Setter agent {} for {} failed ({}), recovering",
            notice.generation, self.kind, notice.error
        );

        let recovered = self
            .recreate_setter(&mut slot)
            .and_then(|()| self.replay(&slot));
        if let Err(e) = recovered {
            error!("Setter recovery for {} failed: {}", self.kind, e);
        }
    }
}

/// Selection protocol endpoint for one selection
///
/// Operations block only for the bounded waits configured in
/// [`SelectionConfig`]. Calls from many threads are serialized per role.
pub struct SelectionService {
    shared: Arc<ServiceShared>,
    supervisor: Option<Supervisor>,
}

impl SelectionService {
    /// Connect both agents and start the supervisor
    pub fn new(
        transport: Arc<dyn Transport>,
        kind: SelectionKind,
        config: SelectionConfig,
    ) -> Result<Self> {
        let generations = AtomicU64::new(0);
        let (fault_tx, fault_rx) = unbounded();

        let getter = ServiceShared::spawn_getter(
            &*transport,
            kind,
            &config,
            ServiceShared::next_generation(&generations),
        )?;
        let setter = ServiceShared::spawn_setter(
            &*transport,
            kind,
            &config,
            ServiceShared::next_generation(&generations),
            fault_tx.clone(),
        )?;

        let shared = Arc::new(ServiceShared {
            transport,
            kind,
            config,
            generations,
            fault_tx,
            getter: Mutex::new(getter),
            setter: Mutex::new(SetterSlot {
                agent: setter,
                last_content: None,
            }),
        });

        let supervisor = Supervisor::spawn(Arc::downgrade(&shared), fault_rx, kind)?;
        info!("Selection service for {} ready", kind);

        Ok(Self {
            shared,
            supervisor: Some(supervisor),
        })
    }

    /// Selection this service works on
    pub fn kind(&self) -> SelectionKind {
        self.shared.kind
    }

    /// Fetch `targets` from the current owner
    ///
    /// Every requested target appears in the result; unanswered ones are
    /// null. A transport failure is retried once on a fresh connection.
    pub fn get<S: AsRef<str>>(&self, targets: &[S]) -> Result<SelectionData> {
        let targets: Vec<String> = targets.iter().map(|t| t.as_ref().to_string()).collect();
        let mut getter = self.shared.getter.lock();
        let mut attempt = 0;

        loop {
            let error = match getter.fetch(&targets) {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };

            let context = ErrorContext::new(AgentRole::Getter)
                .with_attempt(attempt)
                .with_details("get");
            match recovery_action(&error, &context) {
                RecoveryAction::RecreateAgent => {
                    warn!(
                        "Getter agent {} for {} failed ({}), retrying once",
                        getter.generation(),
                        self.shared.kind,
                        error
                    );
                    *getter = self.shared.recreate_getter()?;
                    attempt += 1;
                }
                _ => return Err(error),
            }
        }
    }

    /// Own the selection and serve `content` until replaced or cleared
    pub fn set(&self, content: ContentMap) -> Result<()> {
        let content = Arc::new(content);
        let mut slot = self.shared.setter.lock();
        slot.last_content = Some(Arc::clone(&content));
        let mut attempt = 0;

        loop {
            let error = match slot.agent.set(Arc::clone(&content)) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let context = ErrorContext::new(AgentRole::Setter)
                .with_attempt(attempt)
                .with_details("set");
            match recovery_action(&error, &context) {
                RecoveryAction::RecreateAndReplay => {
                    warn!("Setter for {} failed ({}), redeclaring", self.shared.kind, error);
                    self.shared.recreate_setter(&mut slot)?;
                    attempt += 1;
                }
                _ => {
                    slot.last_content = None;
                    return Err(error);
                }
            }
        }
    }

    /// Drop the declared content and release ownership
    pub fn clear(&self) -> Result<()> {
        let mut slot = self.shared.setter.lock();
        slot.last_content = None;

        let error = match slot.agent.clear() {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let context = ErrorContext::new(AgentRole::Setter).with_details("clear");
        match recovery_action(&error, &context) {
            // A fresh setter owns nothing, which is what clear asked for
            RecoveryAction::RecreateAndReplay => self.shared.recreate_setter(&mut slot),
            _ => Err(error),
        }
    }

    /// Ask the Selection Manager to keep the content after this process exits
    ///
    /// A no-op when there is no manager, when not owning, or for selections
    /// other than CLIPBOARD.
    pub fn store(&self) -> Result<()> {
        let mut slot = self.shared.setter.lock();
        let mut attempt = 0;

        loop {
            let error = match slot.agent.store() {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let context = ErrorContext::new(AgentRole::Setter)
                .with_attempt(attempt)
                .with_details("store");
            match recovery_action(&error, &context) {
                RecoveryAction::RecreateAndReplay => {
                    warn!("Setter for {} failed during store ({})", self.shared.kind, error);
                    self.shared.recreate_setter(&mut slot)?;
                    self.shared.replay(&slot)?;
                    attempt += 1;
                }
                _ => return Err(error),
            }
        }
    }
}

impl Drop for SelectionService {
    fn drop(&mut self) {
        // Stop recovery before the agents go away
        self.supervisor.take();
        debug!("Selection service for {} stopped", self.shared.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalDisplay;

    #[test]
    fn test_selection_kind_names() {
        assert_eq!(SelectionKind::Clipboard.atom_name(), "CLIPBOARD");
        assert_eq!(SelectionKind::Primary.atom_name(), "PRIMARY");
        assert_eq!(SelectionKind::Secondary.to_string(), "secondary");
        assert_eq!(SelectionKind::default(), SelectionKind::Clipboard);
    }

    #[test]
    fn test_await_reply_timeout_and_disconnect() {
        let (tx, rx) = crossbeam_channel::bounded::<Result<()>>(1);

        match await_reply(&rx, Duration::from_millis(5)) {
            Err(SelectionError::Timeout(5)) => {}
            other => panic!("Expected Timeout, got {:?}", other),
        }

        drop(tx);
        match await_reply(&rx, Duration::from_millis(5)) {
            Err(SelectionError::BrokenConnection(TransportError::Disconnected)) => {}
            other => panic!("Expected BrokenConnection, got {:?}", other),
        }
    }

    #[test]
    fn test_agents_get_distinct_generations() {
        let display = LocalDisplay::new();
        let service = SelectionService::new(
            Arc::new(display),
            SelectionKind::Primary,
            SelectionConfig::default(),
        )
        .unwrap();

        let getter = service.shared.getter.lock().generation();
        let setter = service.shared.setter.lock().agent.generation();
        assert_ne!(getter, setter);

        service.shared.recreate_setter(&mut service.shared.setter.lock()).unwrap();
        assert!(service.shared.setter.lock().agent.generation() > setter);
    }

    #[test]
    fn test_get_from_unowned_selection() {
        let display = LocalDisplay::new();
        let service = SelectionService::new(
            Arc::new(display),
            SelectionKind::Secondary,
            SelectionConfig::default(),
        )
        .unwrap();

        let data = service.get(&["STRING", "TARGETS"]).unwrap();
        assert_eq!(data.len(), 2);
        assert!(data.get("STRING").is_none());
        assert!(data.get("TARGETS").is_none());
    }
}
