//! Selection Manager for a [`LocalDisplay`]
//!
//! Owns `CLIPBOARD_MANAGER` and answers `SAVE_TARGETS` the way clipboard
//! managers do: fetch the listed targets from the current CLIPBOARD owner,
//! take CLIPBOARD over and keep serving that data after the original owner
//! is gone.

use super::{Atom, Connection, LocalDisplay, SelectionEvent, WindowId, CURRENT_TIME, NONE};
use crate::atoms::{CLIPBOARD_MANAGER, SAVE_TARGETS};
use crate::config::SelectionConfig;
use crate::error::{Result, TransportError};
use crate::selection::{SelectionKind, SelectionService};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "selection-manager";

/// In-process Selection Manager
pub struct SelectionManagerStub {
    saved: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SelectionManagerStub {
    /// Start a manager that adopts clipboard content
    pub fn start(display: &LocalDisplay) -> Result<Self> {
        Self::spawn(display, false)
    }

    /// Start a manager that refuses every hand-off
    pub fn start_refusing(display: &LocalDisplay) -> Result<Self> {
        Self::spawn(display, true)
    }

    /// Targets adopted by the most recent successful hand-off
    pub fn saved_targets(&self) -> Vec<String> {
        self.saved.lock().clone()
    }

    fn spawn(display: &LocalDisplay, refuse: bool) -> Result<Self> {
        let conn = display.open(CLIENT_NAME);
        let window = conn.create_window(CLIENT_NAME)?;
        let manager_atom = conn.intern_atom(CLIPBOARD_MANAGER)?;
        let save_targets = conn.intern_atom(SAVE_TARGETS)?;
        conn.set_selection_owner(window, manager_atom, CURRENT_TIME)?;

        let config = SelectionConfig {
            client_name: CLIENT_NAME.to_string(),
            ..SelectionConfig::default()
        };
        let clipboard =
            SelectionService::new(Arc::new(display.clone()), SelectionKind::Clipboard, config)?;

        let saved = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let worker = ManagerWorker {
            conn: Box::new(conn),
            window,
            manager_atom,
            save_targets,
            clipboard,
            refuse,
            saved: Arc::clone(&saved),
        };

        let thread_handle = thread::Builder::new()
            .name(CLIENT_NAME.to_string())
            .spawn(move || worker.run(shutdown_rx))
            .map_err(|e| TransportError::Send(format!("manager thread spawn failed: {}", e)))?;

        info!("Selection manager running (refusing: {})", refuse);

        Ok(Self {
            saved,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }
}

impl Drop for SelectionManagerStub {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Selection manager thread panicked");
            }
        }
    }
}

struct ManagerWorker {
    conn: Box<dyn Connection>,
    window: WindowId,
    manager_atom: Atom,
    save_targets: Atom,
    clipboard: SelectionService,
    refuse: bool,
    saved: Arc<Mutex<Vec<String>>>,
}

impl ManagerWorker {
    fn run(self, shutdown_rx: Receiver<()>) {
        let events = self.conn.events();

        loop {
            select! {
                recv(shutdown_rx) -> _ => break,
                recv(events) -> event => {
                    let Ok(event) = event else {
                        break;
                    };
                    if let Err(e) = self.handle_event(event) {
                        warn!("Selection manager failed: {}", e);
                        break;
                    }
                }
            }
        }

        debug!("Selection manager stopped");
    }

    fn handle_event(&self, event: SelectionEvent) -> Result<()> {
        let SelectionEvent::Request {
            owner,
            requestor,
            selection,
            target,
            property,
            time,
        } = event
        else {
            return Ok(());
        };

        let adopted = if owner == self.window
            && selection == self.manager_atom
            && target == self.save_targets
            && !self.refuse
        {
            self.adopt(requestor, property)
        } else {
            false
        };

        let notify = SelectionEvent::Notify {
            requestor,
            selection,
            target,
            property: if adopted { property } else { NONE },
            time,
        };
        match self.conn.send_event(requestor, notify) {
            Err(TransportError::BadIdentifier(_)) => return Ok(()),
            result => result?,
        }
        self.conn.flush()?;
        Ok(())
    }

    /// Copy the listed targets and take CLIPBOARD over
    fn adopt(&self, requestor: WindowId, property: Atom) -> bool {
        let atoms = match self.conn.get_property(requestor, property, false) {
            Ok(Some(list)) => list.as_atoms().map(<[Atom]>::to_vec).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Cannot read save list: {}", e);
                return false;
            }
        };

        let targets: Vec<String> = atoms
            .iter()
            .filter_map(|atom| self.conn.atom_name(*atom).ok())
            .collect();

        let content = match self.clipboard.get(&targets) {
            Ok(data) => data.into_content(),
            Err(e) => {
                warn!("Cannot fetch clipboard for saving: {}", e);
                return false;
            }
        };

        if let Err(e) = self.clipboard.set(content) {
            warn!("Cannot adopt clipboard: {}", e);
            return false;
        }

        info!("Adopted {} clipboard targets", targets.len());
        *self.saved.lock() = targets;
        true
    }
}
