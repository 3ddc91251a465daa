//! In-process selection protocol server
//!
//! `LocalDisplay` keeps atoms, windows, properties and selection ownership
//! for any number of client connections inside one process, and routes
//! selection events between them with the server semantics agents rely on:
//!
//! - ownership changes send SelectionClear to the previous owner
//! - conversion requests go to the owner, or come straight back refused
//! - requests and sent events are buffered per connection until `flush`
//! - a closed connection loses its windows and its selections
//!
//! Fault injection (`fail_flushes`, `disconnect`) lets callers exercise the
//! recovery paths.

use super::{
    Atom, Connection, Property, SelectionEvent, Transport, TransportResult, WindowId, NONE,
};
use crate::error::TransportError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

type ClientId = u64;

struct ClientState {
    name: String,
    events: Sender<SelectionEvent>,
}

struct WindowState {
    client: ClientId,
    properties: HashMap<Atom, Property>,
}

#[derive(Default)]
struct DisplayState {
    atom_names: Vec<String>,
    atom_ids: HashMap<String, Atom>,
    next_window: WindowId,
    next_client: ClientId,
    windows: HashMap<WindowId, WindowState>,
    owners: HashMap<Atom, WindowId>,
    clients: HashMap<ClientId, ClientState>,
    flush_failures: HashMap<String, u32>,
}

impl DisplayState {
    fn check_alive(&self, client: ClientId) -> TransportResult<()> {
        if self.clients.contains_key(&client) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    fn check_window(&self, window: WindowId) -> TransportResult<&WindowState> {
        self.windows
            .get(&window)
            .ok_or(TransportError::BadIdentifier(window))
    }

    fn deliver(&self, window: WindowId, event: SelectionEvent) {
        let Some(client) = self
            .windows
            .get(&window)
            .and_then(|w| self.clients.get(&w.client))
        else {
            trace!("Dropping event for vanished window {}", window);
            return;
        };

        if client.events.send(event).is_err() {
            trace!("Client {} no longer reads events", client.name);
        }
    }

    fn remove_client(&mut self, client: ClientId) {
        let Some(state) = self.clients.remove(&client) else {
            return;
        };

        self.windows.retain(|_, window| window.client != client);
        let windows = &self.windows;
        self.owners.retain(|_, owner| windows.contains_key(owner));

        debug!("Client {} closed", state.name);
    }
}

/// Buffered outgoing request
enum Outgoing {
    Convert {
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: u32,
    },
    Event {
        destination: WindowId,
        event: SelectionEvent,
    },
}

/// In-process selection protocol server
///
/// Cheap to clone; clones share the same server state.
#[derive(Clone, Default)]
pub struct LocalDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl LocalDisplay {
    /// Create an empty display
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a concrete connection
    pub fn open(&self, client_name: &str) -> LocalConnection {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock();

        state.next_client += 1;
        let client = state.next_client;
        state.clients.insert(
            client,
            ClientState {
                name: client_name.to_string(),
                events: tx,
            },
        );

        debug!("Client {} connected", client_name);

        LocalConnection {
            state: Arc::clone(&self.state),
            client,
            events: rx,
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `count` flushes of connections named `client_name` fail
    pub fn fail_flushes(&self, client_name: &str, count: u32) {
        self.state
            .lock()
            .flush_failures
            .insert(client_name.to_string(), count);
    }

    /// Sever every live connection named `client_name`
    ///
    /// Their windows and selections are released and their event queues
    /// disconnect; later calls on them fail with `Disconnected`.
    pub fn disconnect(&self, client_name: &str) {
        let mut state = self.state.lock();
        let doomed: Vec<ClientId> = state
            .clients
            .iter()
            .filter(|(_, c)| c.name == client_name)
            .map(|(id, _)| *id)
            .collect();

        for client in doomed {
            state.remove_client(client);
        }
    }

    /// Current owner of the named selection, or [`NONE`]
    pub fn owner_of(&self, selection: &str) -> WindowId {
        let state = self.state.lock();
        state
            .atom_ids
            .get(selection)
            .and_then(|atom| state.owners.get(atom))
            .copied()
            .unwrap_or(NONE)
    }

    /// Name of the client owning `window`
    pub fn client_of(&self, window: WindowId) -> Option<String> {
        let state = self.state.lock();
        state
            .windows
            .get(&window)
            .and_then(|w| state.clients.get(&w.client))
            .map(|c| c.name.clone())
    }
}

impl Transport for LocalDisplay {
    fn connect(&self, client_name: &str) -> TransportResult<Box<dyn Connection>> {
        Ok(Box::new(self.open(client_name)))
    }
}

/// One client connection to a [`LocalDisplay`]
pub struct LocalConnection {
    state: Arc<Mutex<DisplayState>>,
    client: ClientId,
    events: Receiver<SelectionEvent>,
    outbox: Mutex<Vec<Outgoing>>,
}

impl Connection for LocalConnection {
    fn intern_atom(&self, name: &str) -> TransportResult<Atom> {
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        if let Some(atom) = state.atom_ids.get(name) {
            return Ok(*atom);
        }

        state.atom_names.push(name.to_string());
        let atom = state.atom_names.len() as Atom;
        state.atom_ids.insert(name.to_string(), atom);
        Ok(atom)
    }

    fn atom_name(&self, atom: Atom) -> TransportResult<String> {
        let state = self.state.lock();
        state.check_alive(self.client)?;

        atom.checked_sub(1)
            .and_then(|index| state.atom_names.get(index as usize))
            .cloned()
            .ok_or(TransportError::BadIdentifier(atom))
    }

    fn create_window(&self, name: &str) -> TransportResult<WindowId> {
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        state.next_window += 1;
        let window = state.next_window;
        state.windows.insert(
            window,
            WindowState {
                client: self.client,
                properties: HashMap::new(),
            },
        );

        trace!("Created window {} ({})", window, name);
        Ok(window)
    }

    fn selection_owner(&self, selection: Atom) -> TransportResult<WindowId> {
        let state = self.state.lock();
        state.check_alive(self.client)?;
        Ok(state.owners.get(&selection).copied().unwrap_or(NONE))
    }

    fn set_selection_owner(
        &self,
        window: WindowId,
        selection: Atom,
        time: u32,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        if window != NONE {
            state.check_window(window)?;
        }

        let previous = if window == NONE {
            state.owners.remove(&selection)
        } else {
            state.owners.insert(selection, window)
        };

        if let Some(previous) = previous.filter(|p| *p != window) {
            state.deliver(
                previous,
                SelectionEvent::Clear {
                    window: previous,
                    selection,
                    time,
                },
            );
        }

        Ok(())
    }

    fn convert_selection(
        &self,
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: u32,
    ) -> TransportResult<()> {
        let state = self.state.lock();
        state.check_alive(self.client)?;
        state.check_window(requestor)?;
        drop(state);

        self.outbox.lock().push(Outgoing::Convert {
            requestor,
            selection,
            target,
            property,
            time,
        });
        Ok(())
    }

    fn get_property(
        &self,
        window: WindowId,
        property: Atom,
        delete: bool,
    ) -> TransportResult<Option<Property>> {
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        let window = state
            .windows
            .get_mut(&window)
            .ok_or(TransportError::BadIdentifier(window))?;

        if delete {
            Ok(window.properties.remove(&property))
        } else {
            Ok(window.properties.get(&property).cloned())
        }
    }

    fn change_property(
        &self,
        window: WindowId,
        property: Atom,
        value: Property,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        state
            .windows
            .get_mut(&window)
            .ok_or(TransportError::BadIdentifier(window))?
            .properties
            .insert(property, value);
        Ok(())
    }

    fn send_event(&self, destination: WindowId, event: SelectionEvent) -> TransportResult<()> {
        let state = self.state.lock();
        state.check_alive(self.client)?;
        state.check_window(destination)?;
        drop(state);

        self.outbox.lock().push(Outgoing::Event { destination, event });
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        let pending = std::mem::take(&mut *self.outbox.lock());
        let mut state = self.state.lock();
        state.check_alive(self.client)?;

        let name = state
            .clients
            .get(&self.client)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        if let Some(remaining) = state.flush_failures.get_mut(&name).filter(|n| **n > 0) {
            *remaining -= 1;
            debug!("Injected flush failure for {} ({} left)", name, remaining);
            return Err(TransportError::Flush(format!("injected failure for {}", name)));
        }

        for outgoing in pending {
            match outgoing {
                Outgoing::Convert {
                    requestor,
                    selection,
                    target,
                    property,
                    time,
                } => match state.owners.get(&selection).copied() {
                    Some(owner) => state.deliver(
                        owner,
                        SelectionEvent::Request {
                            owner,
                            requestor,
                            selection,
                            target,
                            property,
                            time,
                        },
                    ),
                    None => state.deliver(
                        requestor,
                        SelectionEvent::Notify {
                            requestor,
                            selection,
                            target,
                            property: NONE,
                            time,
                        },
                    ),
                },
                Outgoing::Event { destination, event } => state.deliver(destination, event),
            }
        }

        Ok(())
    }

    fn events(&self) -> Receiver<SelectionEvent> {
        self.events.clone()
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.state.lock().remove_client(self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CURRENT_TIME;

    #[test]
    fn test_atoms_start_at_one() {
        let display = LocalDisplay::new();
        let conn = display.open("a");

        let first = conn.intern_atom("PRIMARY").unwrap();
        assert_eq!(first, 1);
        assert_eq!(conn.intern_atom("PRIMARY").unwrap(), 1);
        assert_eq!(conn.atom_name(first).unwrap(), "PRIMARY");

        match conn.atom_name(42) {
            Err(TransportError::BadIdentifier(42)) => {}
            other => panic!("Expected BadIdentifier, got {:?}", other),
        }
        assert!(conn.atom_name(NONE).is_err());
    }

    #[test]
    fn test_ownership_change_clears_previous_owner() {
        let display = LocalDisplay::new();
        let a = display.open("a");
        let b = display.open("b");
        let selection = a.intern_atom("CLIPBOARD").unwrap();
        let wa = a.create_window("a").unwrap();
        let wb = b.create_window("b").unwrap();

        a.set_selection_owner(wa, selection, CURRENT_TIME).unwrap();
        a.set_selection_owner(wa, selection, CURRENT_TIME).unwrap();
        assert!(a.events().try_recv().is_err());

        b.set_selection_owner(wb, selection, CURRENT_TIME).unwrap();
        assert_eq!(b.selection_owner(selection).unwrap(), wb);
        assert_eq!(
            a.events().try_recv().unwrap(),
            SelectionEvent::Clear {
                window: wa,
                selection,
                time: CURRENT_TIME
            }
        );
    }

    #[test]
    fn test_convert_buffered_until_flush() {
        let display = LocalDisplay::new();
        let owner = display.open("owner");
        let requestor = display.open("requestor");
        let selection = owner.intern_atom("CLIPBOARD").unwrap();
        let target = owner.intern_atom("STRING").unwrap();
        let wo = owner.create_window("owner").unwrap();
        let wr = requestor.create_window("requestor").unwrap();
        owner.set_selection_owner(wo, selection, CURRENT_TIME).unwrap();

        requestor
            .convert_selection(wr, selection, target, target, CURRENT_TIME)
            .unwrap();
        assert!(owner.events().try_recv().is_err());

        requestor.flush().unwrap();
        match owner.events().try_recv().unwrap() {
            SelectionEvent::Request {
                owner: o,
                requestor: r,
                target: t,
                ..
            } => {
                assert_eq!(o, wo);
                assert_eq!(r, wr);
                assert_eq!(t, target);
            }
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_without_owner_is_refused() {
        let display = LocalDisplay::new();
        let conn = display.open("requestor");
        let selection = conn.intern_atom("SECONDARY").unwrap();
        let window = conn.create_window("requestor").unwrap();

        conn.convert_selection(window, selection, selection, selection, CURRENT_TIME)
            .unwrap();
        conn.flush().unwrap();

        match conn.events().try_recv().unwrap() {
            SelectionEvent::Notify { property, .. } => assert_eq!(property, NONE),
            other => panic!("Expected Notify, got {:?}", other),
        }
    }

    #[test]
    fn test_properties_read_with_delete() {
        let display = LocalDisplay::new();
        let conn = display.open("a");
        let window = conn.create_window("a").unwrap();
        let prop = conn.intern_atom("P").unwrap();

        conn.change_property(window, prop, Property::bytes(prop, b"data".to_vec()))
            .unwrap();
        assert!(conn.get_property(window, prop, false).unwrap().is_some());
        assert_eq!(
            conn.get_property(window, prop, true).unwrap().unwrap().as_bytes(),
            Some(&b"data"[..])
        );
        assert!(conn.get_property(window, prop, true).unwrap().is_none());

        assert!(conn.get_property(999, prop, false).is_err());
    }

    #[test]
    fn test_send_event_to_unknown_window() {
        let display = LocalDisplay::new();
        let conn = display.open("a");
        let event = SelectionEvent::Clear {
            window: 5,
            selection: 1,
            time: CURRENT_TIME,
        };

        match conn.send_event(5, event) {
            Err(TransportError::BadIdentifier(5)) => {}
            other => panic!("Expected BadIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_flushes() {
        let display = LocalDisplay::new();
        let conn = display.open("flaky");
        display.fail_flushes("flaky", 2);

        assert!(matches!(conn.flush(), Err(TransportError::Flush(_))));
        assert!(matches!(conn.flush(), Err(TransportError::Flush(_))));
        assert!(conn.flush().is_ok());
    }

    #[test]
    fn test_disconnect_releases_selection() {
        let display = LocalDisplay::new();
        let conn = display.open("victim");
        let other = display.open("other");
        let selection = conn.intern_atom("CLIPBOARD").unwrap();
        let window = conn.create_window("victim").unwrap();
        conn.set_selection_owner(window, selection, CURRENT_TIME).unwrap();
        let events = conn.events();

        display.disconnect("victim");

        assert_eq!(other.selection_owner(selection).unwrap(), NONE);
        assert_eq!(display.owner_of("CLIPBOARD"), NONE);
        assert!(matches!(conn.flush(), Err(TransportError::Disconnected)));
        assert!(events.recv().is_err());
    }

    #[test]
    fn test_drop_releases_selection() {
        let display = LocalDisplay::new();
        let observer = display.open("observer");
        let selection = observer.intern_atom("PRIMARY").unwrap();
        {
            let conn = display.open("short-lived");
            let window = conn.create_window("w").unwrap();
            conn.set_selection_owner(window, selection, CURRENT_TIME).unwrap();
            assert_eq!(display.client_of(window).as_deref(), Some("short-lived"));
        }

        assert_eq!(observer.selection_owner(selection).unwrap(), NONE);
    }
}
