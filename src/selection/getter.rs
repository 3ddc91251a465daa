//! Getter Agent
//!
//! Fetches targets from whichever client currently owns a selection. The
//! agent runs on its own thread with its own connection; callers hand it
//! `Fetch` commands and block on the reply.
//!
//! ```text
//! Idle ──fetch──> AwaitingOwner ──no owner──────────────> Idle (all null)
//!                      │
//!                      └─owner──> convert × N, flush
//!                                      │
//!                                 AwaitingReplies
//!                                   ├─ first window: wait for one reply
//!                                   └─ drain window: collect the rest
//!                                      │
//!                                      └──> Idle (unanswered = null)
//! ```
//!
//! Each fetch stamps its conversions with a fresh round number as the
//! request time. Owners echo it back, so a notify from an earlier round
//! that arrives late is told apart from the current answer.

use super::{await_reply, SelectionKind};
use crate::atoms::{AtomCache, TARGETS};
use crate::config::SelectionConfig;
use crate::content::{SelectionData, SelectionValue};
use crate::error::{Result, SelectionError, TransportError};
use crate::transport::{Atom, Connection, PropertyData, SelectionEvent, WindowId, NONE};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Commands for the getter thread
pub(crate) enum GetterCommand {
    /// Fetch the named targets
    Fetch {
        targets: Vec<String>,
        response_tx: Sender<Result<SelectionData>>,
    },

    /// Stop the worker and close its connection
    Shutdown,
}

/// Handle to a running getter thread
pub(crate) struct GetterAgent {
    generation: u64,
    command_tx: Sender<GetterCommand>,
    thread_handle: Option<JoinHandle<()>>,
    command_timeout: Duration,
}

impl GetterAgent {
    /// Prepare the connection on the calling thread, then hand it to a new worker
    pub(crate) fn spawn(
        conn: Box<dyn Connection>,
        kind: SelectionKind,
        config: &SelectionConfig,
        generation: u64,
    ) -> Result<Self> {
        let worker = GetterWorker::new(conn, kind, config)?;
        let (command_tx, command_rx) = unbounded();

        let thread_handle = thread::Builder::new()
            .name(format!("selection-getter-{}", kind))
            .spawn(move || worker.run(command_rx))
            .map_err(|e| TransportError::Send(format!("getter thread spawn failed: {}", e)))?;

        debug!("Getter agent {} started for {}", generation, kind);

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

    /// Fetch `targets` from the current owner
    pub(crate) fn fetch(&self, targets: &[String]) -> Result<SelectionData> {
        let (response_tx, response_rx) = bounded(1);
        self.command_tx
            .send(GetterCommand::Fetch {
                targets: targets.to_vec(),
                response_tx,
            })
            .map_err(|_| SelectionError::BrokenConnection(TransportError::Disconnected))?;

        await_reply(&response_rx, self.command_timeout)
    }
}

impl Drop for GetterAgent {
    fn drop(&mut self) {
        let _ = self.command_tx.send(GetterCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Getter agent {} panicked", self.generation);
            }
        }
    }
}

/// State owned by the getter thread
struct GetterWorker {
    conn: Box<dyn Connection>,
    atoms: AtomCache,
    events: Receiver<SelectionEvent>,
    window: WindowId,
    selection: Atom,
    targets_atom: Atom,
    first_reply_window: Duration,
    drain_window: Duration,

    /// Request time of the current fetch; never CURRENT_TIME
    round: u32,
}

impl GetterWorker {
    fn new(
        conn: Box<dyn Connection>,
        kind: SelectionKind,
        config: &SelectionConfig,
    ) -> Result<Self> {
        let mut atoms = AtomCache::new();
        let selection = atoms.intern(&*conn, kind.atom_name())?;
        let targets_atom = atoms.intern(&*conn, TARGETS)?;
        let window = conn.create_window("selection getter")?;
        let events = conn.events();

        Ok(Self {
            conn,
            atoms,
            events,
            window,
            selection,
            targets_atom,
            first_reply_window: config.first_reply_window(),
            drain_window: config.drain_window(),
            round: 0,
        })
    }

    fn run(mut self, command_rx: Receiver<GetterCommand>) {
        while let Ok(command) = command_rx.recv() {
            match command {
                GetterCommand::Fetch {
                    targets,
                    response_tx,
                } => {
                    let result = self.fetch(&targets);
                    let broken = matches!(&result, Err(e) if e.is_broken_connection());
                    let _ = response_tx.send(result);

                    if broken {
                        warn!("Getter connection broken, worker exiting");
                        break;
                    }
                }
                GetterCommand::Shutdown => break,
            }
        }

        debug!("Getter worker stopped");
    }

    fn fetch(&mut self, targets: &[String]) -> Result<SelectionData> {
        let mut data = SelectionData::unresolved(targets);
        if data.is_empty() {
            return Ok(data);
        }

        let stale = self.events.try_iter().count();
        if stale > 0 {
            trace!("Discarded {} late replies", stale);
        }

        let owner = self.conn.selection_owner(self.selection)?;
        if owner == NONE {
            debug!("Selection has no owner");
            return Ok(data);
        }

        self.round = self.round.wrapping_add(1).max(1);
        let round = self.round;

        let names: Vec<String> = data.iter().map(|(name, _)| name.to_string()).collect();
        let mut pending: HashMap<Atom, String> = HashMap::with_capacity(names.len());
        for name in names {
            let target = self.atoms.intern(&*self.conn, &name)?;
            self.conn
                .convert_selection(self.window, self.selection, target, target, round)?;
            pending.insert(target, name);
        }
        self.conn.flush()?;

        debug!("Requested {} targets from window {}", pending.len(), owner);

        let mut deadline = Instant::now() + self.first_reply_window;
        let mut first_reply = true;

        while !pending.is_empty() {
            let event = match self.events.recv_deadline(deadline) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected.into())
                }
            };

            let SelectionEvent::Notify {
                requestor,
                selection,
                target,
                property,
                time,
            } = event
            else {
                trace!("Getter ignoring {:?}", event);
                continue;
            };

            if requestor != self.window || selection != self.selection {
                trace!("Getter ignoring foreign notify");
                continue;
            }

            if time != round {
                trace!("Ignoring notify from round {} during round {}", time, round);
                continue;
            }

            let Some(name) = pending.remove(&target) else {
                trace!("Ignoring reply for unrequested target {}", target);
                continue;
            };

            let value = self.read_reply(target, property)?;
            data.resolve(&name, value);

            if first_reply {
                first_reply = false;
                deadline = Instant::now() + self.drain_window;
            }
        }

        if !pending.is_empty() {
            debug!("{} targets unanswered", pending.len());
        }

        Ok(data)
    }

    fn read_reply(&mut self, target: Atom, property: Atom) -> Result<Option<SelectionValue>> {
        if property == NONE {
            return Ok(None);
        }

        let Some(reply) = self.conn.get_property(self.window, property, true)? else {
            debug!("Reply property {} missing", property);
            return Ok(None);
        };

        if target == self.targets_atom {
            let Some(atoms) = reply.as_atoms() else {
                warn!("TARGETS reply is not an atom list");
                return Ok(None);
            };

            let mut names = Vec::with_capacity(atoms.len());
            for &atom in atoms {
                match self.atoms.name(&*self.conn, atom) {
                    Ok(name) => names.push(name),
                    Err(TransportError::BadIdentifier(_)) => {
                        warn!("Skipping unknown atom {} in TARGETS reply", atom);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(Some(SelectionValue::Targets(names)));
        }

        match reply.data {
            PropertyData::Bytes(bytes) if bytes.is_empty() => Ok(None),
            PropertyData::Bytes(bytes) => Ok(Some(SelectionValue::Bytes(bytes))),
            PropertyData::Atoms(_) => {
                warn!("Atom list reply for data target {}", target);
                Ok(None)
            }
        }
    }
}
