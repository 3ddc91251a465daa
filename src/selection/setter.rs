//! Setter Agent
//!
//! Owns a selection on behalf of the service and answers every conversion
//! request addressed to it, one at a time, in arrival order.
//!
//! ```text
//! Idle ──set──> TakingOwnership ──confirmed──> Owning ──SelectionClear──> Idle
//!                     ▲                          │
//!                     └──── set (self-clear) ────┘
//! ```
//!
//! The worker thread is the only reader of the current content snapshot;
//! new snapshots arrive through its command queue. While it waits on a
//! bounded step (self-clear acknowledgement, manager hand-off) it keeps
//! serving requests so no requestor is starved.

use super::{await_reply, SelectionKind};
use crate::atoms::{
    AtomCache, ATOM, ATOM_PAIR, CLIPBOARD_MANAGER, LAMCO_SELECTION, MULTIPLE, PSEUDO_TARGETS,
    SAVE_TARGETS, TARGETS,
};
use crate::config::SelectionConfig;
use crate::content::ContentMap;
use crate::error::{Result, SelectionError, TransportError};
use crate::transport::{Atom, Connection, Property, SelectionEvent, WindowId, CURRENT_TIME, NONE};
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Commands for the setter thread
pub(crate) enum SetterCommand {
    /// Own the selection with a new snapshot
    Set {
        content: Arc<ContentMap>,
        response_tx: Sender<Result<()>>,
    },

    /// Answer queued requests, then release ownership
    Clear { response_tx: Sender<Result<()>> },

    /// Hand the current snapshot to the Selection Manager
    Store { response_tx: Sender<Result<()>> },

    /// Stop the worker and close its connection
    Shutdown,
}

/// A setter worker died outside any caller's command
#[derive(Debug)]
pub(crate) struct FaultNotice {
    pub(crate) generation: u64,
    pub(crate) error: SelectionError,
}

/// Handle to a running setter thread
pub(crate) struct SetterAgent {
    generation: u64,
    command_tx: Sender<SetterCommand>,
    thread_handle: Option<JoinHandle<()>>,
    command_timeout: Duration,
}

impl SetterAgent {
    /// Prepare the connection on the calling thread, then hand it to a new worker
    pub(crate) fn spawn(
        conn: Box<dyn Connection>,
        kind: SelectionKind,
        config: &SelectionConfig,
        generation: u64,
        fault_tx: Sender<FaultNotice>,
    ) -> Result<Self> {
        let worker = SetterWorker::new(conn, kind, config, generation, fault_tx)?;
        let (command_tx, command_rx) = unbounded();

        let thread_handle = thread::Builder::new()
            .name(format!("selection-setter-{}", kind))
            .spawn(move || worker.run(command_rx))
            .map_err(|e| TransportError::Send(format!("setter thread spawn failed: {}", e)))?;

        debug!("Setter agent {} started for {}", generation, kind);

        Ok(Self {
            generation,
            command_tx,
            thread_handle: Some(thread_handle),
            command_timeout: config.command_timeout(),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set(&self, content: Arc<ContentMap>) -> Result<()> {
        self.request(|response_tx| SetterCommand::Set {
            content,
            response_tx,
        })
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.request(|response_tx| SetterCommand::Clear { response_tx })
    }

    pub(crate) fn store(&self) -> Result<()> {
        self.request(|response_tx| SetterCommand::Store { response_tx })
    }

    fn request(&self, command: impl FnOnce(Sender<Result<()>>) -> SetterCommand) -> Result<()> {
        let (response_tx, response_rx) = bounded(1);
        self.command_tx
            .send(command(response_tx))
            .map_err(|_| SelectionError::BrokenConnection(TransportError::Disconnected))?;

        await_reply(&response_rx, self.command_timeout)
    }
}

impl Drop for SetterAgent {
    fn drop(&mut self) {
        let _ = self.command_tx.send(SetterCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Setter agent {} panicked", self.generation);
            }
        }
    }
}

/// Atoms the setter needs on every request
struct SetterAtoms {
    targets: Atom,
    multiple: Atom,
    save_targets: Atom,
    atom: Atom,
    atom_pair: Atom,
    clipboard_manager: Atom,
    lamco_selection: Atom,
}

/// Fields of a SelectionRequest
#[derive(Debug, Clone, Copy)]
struct Request {
    owner: WindowId,
    requestor: WindowId,
    selection: Atom,
    target: Atom,
    property: Atom,
    time: u32,
}

/// State owned by the setter thread
struct SetterWorker {
    conn: Box<dyn Connection>,
    atoms: AtomCache,
    well_known: SetterAtoms,
    events: Receiver<SelectionEvent>,
    window: WindowId,
    kind: SelectionKind,
    selection: Atom,
    config: SelectionConfig,
    generation: u64,
    fault_tx: Sender<FaultNotice>,

    /// Some while owning
    content: Option<Arc<ContentMap>>,
}

impl SetterWorker {
    fn new(
        conn: Box<dyn Connection>,
        kind: SelectionKind,
        config: &SelectionConfig,
        generation: u64,
        fault_tx: Sender<FaultNotice>,
    ) -> Result<Self> {
        let mut atoms = AtomCache::new();
        let selection = atoms.intern(&*conn, kind.atom_name())?;
        let well_known = SetterAtoms {
            targets: atoms.intern(&*conn, TARGETS)?,
            multiple: atoms.intern(&*conn, MULTIPLE)?,
            save_targets: atoms.intern(&*conn, SAVE_TARGETS)?,
            atom: atoms.intern(&*conn, ATOM)?,
            atom_pair: atoms.intern(&*conn, ATOM_PAIR)?,
            clipboard_manager: atoms.intern(&*conn, CLIPBOARD_MANAGER)?,
            lamco_selection: atoms.intern(&*conn, LAMCO_SELECTION)?,
        };
        let window = conn.create_window("selection setter")?;
        let events = conn.events();

        Ok(Self {
            conn,
            atoms,
            well_known,
            events,
            window,
            kind,
            selection,
            config: config.clone(),
            generation,
            fault_tx,
            content: None,
        })
    }

    fn run(mut self, command_rx: Receiver<SetterCommand>) {
        let events = self.events.clone();

        loop {
            select! {
                recv(command_rx) -> command => {
                    let Ok(command) = command else {
                        break;
                    };

                    let (result, response_tx) = match command {
                        SetterCommand::Set {
                            content,
                            response_tx,
                        } => (self.handle_set(content), response_tx),
                        SetterCommand::Clear { response_tx } => (self.handle_clear(), response_tx),
                        SetterCommand::Store { response_tx } => (self.handle_store(), response_tx),
                        SetterCommand::Shutdown => break,
                    };

                    let broken = matches!(&result, Err(e) if e.is_broken_connection());
                    let _ = response_tx.send(result);
                    if broken {
                        warn!("Setter connection broken, worker exiting");
                        break;
                    }
                }
                recv(events) -> event => {
                    let result = match event {
                        Ok(event) => self.handle_event(event),
                        Err(_) => Err(TransportError::Disconnected.into()),
                    };

                    if let Err(e) = result {
                        error!("Setter agent {} died: {}", self.generation, e);
                        let _ = self.fault_tx.send(FaultNotice {
                            generation: self.generation,
                            error: e,
                        });
                        break;
                    }
                }
            }
        }

        debug!("Setter worker stopped");
    }

    fn handle_event(&mut self, event: SelectionEvent) -> Result<()> {
        match event {
            SelectionEvent::Request {
                owner,
                requestor,
                selection,
                target,
                property,
                time,
            } => self.serve_request(Request {
                owner,
                requestor,
                selection,
                target,
                property,
                time,
            }),

            SelectionEvent::Clear { window, selection, .. } => {
                if window != self.window || selection != self.selection || self.content.is_none() {
                    trace!("Ignoring clear for window {}", window);
                    return Ok(());
                }

                if self.conn.selection_owner(self.selection)? == self.window {
                    trace!("Ignoring stale clear");
                    return Ok(());
                }

                // Requests still queued behind the clear are refused as they come up
                self.content = None;
                info!("Lost ownership of {}", self.kind);
                Ok(())
            }

            SelectionEvent::Notify { .. } => {
                trace!("Ignoring stray notify");
                Ok(())
            }
        }
    }

    fn handle_set(&mut self, content: Arc<ContentMap>) -> Result<()> {
        if self.content.is_some() {
            self.await_self_clear()?;
        }

        self.take_ownership()?;

        info!("Owning {} with {} targets", self.kind, content.len());
        self.content = Some(content);
        Ok(())
    }

    /// Clear ourselves and wait for the clear to come back, serving
    /// everything queued before it against the outgoing snapshot
    fn await_self_clear(&mut self) -> Result<()> {
        let clear = SelectionEvent::Clear {
            window: self.window,
            selection: self.selection,
            time: CURRENT_TIME,
        };
        self.conn.send_event(self.window, clear)?;
        self.conn.flush()?;

        let deadline = Instant::now() + self.config.clear_ack_timeout();
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(SelectionEvent::Clear { window, selection, .. })
                    if window == self.window && selection == self.selection =>
                {
                    debug!("Self clear observed");
                    break;
                }
                Ok(event) => self.handle_event(event)?,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Self clear not observed within {:?}", self.config.clear_ack_timeout());
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected.into())
                }
            }
        }

        self.content = None;
        Ok(())
    }

    fn take_ownership(&mut self) -> Result<()> {
        let retry = &self.config.ownership_retry;
        let deadline = Instant::now() + self.config.ownership_timeout();
        let mut attempts = 0;

        loop {
            self.conn
                .set_selection_owner(self.window, self.selection, CURRENT_TIME)?;
            self.conn.flush()?;
            attempts += 1;

            if self.conn.selection_owner(self.selection)? == self.window {
                return Ok(());
            }

            let delay = retry.delay_for_attempt(attempts - 1);
            if Instant::now() + delay >= deadline {
                return Err(SelectionError::OwnershipTimeout {
                    selection: self.kind.to_string(),
                    attempts,
                });
            }

            // Cap for configurations whose back-off never reaches the deadline
            if attempts > retry.max_retries {
                return Err(SelectionError::OwnershipFailed(self.kind.to_string()));
            }

            debug!("Ownership of {} contested, retrying in {:?}", self.kind, delay);
            thread::sleep(delay);
        }
    }

    fn handle_clear(&mut self) -> Result<()> {
        if self.content.is_none() {
            return Ok(());
        }

        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event)?;
        }

        if self.content.take().is_some() {
            self.conn.set_selection_owner(NONE, self.selection, CURRENT_TIME)?;
            self.conn.flush()?;
            info!("Released {}", self.kind);
        }

        Ok(())
    }

    fn handle_store(&mut self) -> Result<()> {
        if self.kind != SelectionKind::Clipboard {
            debug!("Selection managers only adopt CLIPBOARD, not {}", self.kind);
            return Ok(());
        }

        let Some(content) = self.content.clone() else {
            debug!("Not owning {}, nothing to store", self.kind);
            return Ok(());
        };

        let manager = self.conn.selection_owner(self.well_known.clipboard_manager)?;
        if manager == NONE {
            debug!("No selection manager running");
            return Ok(());
        }

        let mut save_list = Vec::new();
        for name in content.save_list() {
            save_list.push(self.atoms.intern(&*self.conn, name)?);
        }

        debug!("Handing {} targets to selection manager {}", save_list.len(), manager);

        self.conn.change_property(
            self.window,
            self.well_known.lamco_selection,
            Property::atoms(self.well_known.atom, save_list),
        )?;
        self.conn.convert_selection(
            self.window,
            self.well_known.clipboard_manager,
            self.well_known.save_targets,
            self.well_known.lamco_selection,
            CURRENT_TIME,
        )?;
        self.conn.flush()?;

        let deadline = Instant::now() + self.config.handoff_timeout();
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(SelectionEvent::Notify {
                    requestor,
                    selection,
                    target,
                    property,
                    ..
                }) if requestor == self.window
                    && selection == self.well_known.clipboard_manager
                    && target == self.well_known.save_targets =>
                {
                    self.conn
                        .get_property(self.window, self.well_known.lamco_selection, true)?;

                    if property == NONE {
                        warn!("Selection manager refused to save targets");
                        return Err(SelectionError::ManagerHandoffFailed);
                    }

                    info!("Selection manager adopted {}", self.kind);
                    return Ok(());
                }
                Ok(event) => self.handle_event(event)?,
                Err(RecvTimeoutError::Timeout) => {
                    let waited = self.config.handoff_timeout_ms;
                    return Err(SelectionError::ManagerHandoffTimeout(waited));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected.into())
                }
            }
        }
    }

    /// Answer one request with exactly one notify
    fn serve_request(&mut self, request: Request) -> Result<()> {
        // Obsolete requestors leave the property unset
        let property = if request.property == NONE {
            request.target
        } else {
            request.property
        };

        let ours = request.owner == self.window && request.selection == self.selection;
        let resolved = match self.content.clone() {
            Some(content) if ours => {
                self.resolve(&content, request.requestor, request.target, property)
            }
            _ => Ok(NONE),
        };

        let reply_property = match resolved {
            Ok(reply_property) => reply_property,
            Err(SelectionError::BrokenConnection(TransportError::BadIdentifier(id)))
                if id == request.requestor =>
            {
                debug!("Requestor {} vanished", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let notify = SelectionEvent::Notify {
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property: reply_property,
            time: request.time,
        };
        match self.conn.send_event(request.requestor, notify) {
            Err(TransportError::BadIdentifier(id)) if id == request.requestor => {
                debug!("Requestor {} vanished", id);
                return Ok(());
            }
            result => result?,
        }
        self.conn.flush()?;

        trace!(
            "Answered target {} for {} with {}",
            request.target,
            request.requestor,
            reply_property
        );
        Ok(())
    }

    fn resolve(
        &mut self,
        content: &ContentMap,
        requestor: WindowId,
        target: Atom,
        property: Atom,
    ) -> Result<Atom> {
        if target == self.well_known.multiple {
            return self.resolve_multiple(content, requestor, property);
        }
        self.convert(content, requestor, target, property)
    }

    /// Convert a single target; returns the property written or NONE
    fn convert(
        &mut self,
        content: &ContentMap,
        requestor: WindowId,
        target: Atom,
        property: Atom,
    ) -> Result<Atom> {
        if target == self.well_known.targets {
            let targets = self.advertised_targets(content)?;
            self.conn.change_property(
                requestor,
                property,
                Property::atoms(self.well_known.atom, targets),
            )?;
            return Ok(property);
        }

        if target == self.well_known.multiple || target == self.well_known.save_targets {
            return Ok(NONE);
        }

        let name = match self.atoms.name(&*self.conn, target) {
            Ok(name) => name,
            Err(TransportError::BadIdentifier(_)) => {
                warn!("Request for unknown atom {}", target);
                return Ok(NONE);
            }
            Err(e) => return Err(e.into()),
        };

        match content.get(&name) {
            Some(payload) => {
                self.conn.change_property(
                    requestor,
                    property,
                    Property::bytes(target, payload.as_bytes().to_vec()),
                )?;
                Ok(property)
            }
            None => Ok(NONE),
        }
    }

    /// Convert every (target, property) pair; refused pairs get a None property
    fn resolve_multiple(
        &mut self,
        content: &ContentMap,
        requestor: WindowId,
        property: Atom,
    ) -> Result<Atom> {
        let pairs = match self.conn.get_property(requestor, property, false)? {
            Some(list) => match list.as_atoms() {
                Some(atoms) if atoms.len() % 2 == 0 => atoms.to_vec(),
                _ => {
                    warn!("Malformed MULTIPLE pair list from {}", requestor);
                    return Ok(NONE);
                }
            },
            None => {
                warn!("MULTIPLE request from {} without pair list", requestor);
                return Ok(NONE);
            }
        };

        let mut replies = Vec::with_capacity(pairs.len());
        for pair in pairs.chunks_exact(2) {
            let (target, target_property) = (pair[0], pair[1]);
            let converted = if target == self.well_known.multiple || target_property == NONE {
                NONE
            } else {
                self.convert(content, requestor, target, target_property)?
            };
            replies.push(target);
            replies.push(converted);
        }

        self.conn.change_property(
            requestor,
            property,
            Property::atoms(self.well_known.atom_pair, replies),
        )?;
        Ok(property)
    }

    /// TARGETS, MULTIPLE, SAVE_TARGETS, then the targets carrying data
    fn advertised_targets(&mut self, content: &ContentMap) -> Result<Vec<Atom>> {
        let names = PSEUDO_TARGETS.into_iter().chain(content.save_list());
        let mut targets = Vec::new();
        for name in names {
            targets.push(self.atoms.intern(&*self.conn, name)?);
        }
        Ok(targets)
    }
}
