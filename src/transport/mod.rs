//! Selection Protocol Transport
//!
//! The windowing-server side of the selection protocol, expressed as a pair
//! of traits so the agents never depend on a concrete server binding.
//!
//! # Model
//!
//! ```text
//! Transport ──connect(name)──> Connection (one per agent)
//!                                 ├─ atoms:      intern_atom / atom_name
//!                                 ├─ windows:    create_window
//!                                 ├─ ownership:  selection_owner / set_selection_owner
//!                                 ├─ transfer:   convert_selection / get_property
//!                                 │              change_property
//!                                 ├─ events:     send_event (buffered) + flush
//!                                 └─ inbound:    events() -> Receiver<SelectionEvent>
//! ```
//!
//! Outgoing events are buffered until [`Connection::flush`], matching how a
//! real display connection batches requests. A connection that is dropped
//! releases every selection its windows own.

use crate::error::TransportError;
use crossbeam_channel::Receiver;

pub mod local;
mod manager;

pub use local::{LocalConnection, LocalDisplay};
pub use manager::SelectionManagerStub;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Server-side identifier for an interned name
pub type Atom = u32;

/// Server-side identifier for a window
pub type WindowId = u32;

/// The None atom / window
pub const NONE: u32 = 0;

/// Timestamp meaning "now" at the server
pub const CURRENT_TIME: u32 = 0;

/// Contents of a window property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyData {
    /// Format 8 data
    Bytes(Vec<u8>),
    /// Format 32 atom list
    Atoms(Vec<Atom>),
}

/// A typed window property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Type atom (ATOM, ATOM_PAIR, or the target itself for data)
    pub kind: Atom,
    /// Property value
    pub data: PropertyData,
}

impl Property {
    /// Byte property of the given type
    pub fn bytes(kind: Atom, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: PropertyData::Bytes(data.into()),
        }
    }

    /// Atom list property of the given type
    pub fn atoms(kind: Atom, atoms: Vec<Atom>) -> Self {
        Self {
            kind,
            data: PropertyData::Atoms(atoms),
        }
    }

    /// Value as raw bytes; atom lists are not bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            PropertyData::Bytes(b) => Some(b),
            PropertyData::Atoms(_) => None,
        }
    }

    /// Value as an atom list
    pub fn as_atoms(&self) -> Option<&[Atom]> {
        match &self.data {
            PropertyData::Atoms(a) => Some(a),
            PropertyData::Bytes(_) => None,
        }
    }
}

/// Selection protocol events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    /// Someone asks `owner` to convert `selection` to `target` into
    /// `requestor`'s `property`
    Request {
        /// Window the request was routed to
        owner: WindowId,
        /// Window that receives the converted data
        requestor: WindowId,
        /// Selection being converted
        selection: Atom,
        /// Format asked for
        target: Atom,
        /// Property on `requestor` to write; [`NONE`] from obsolete clients
        property: Atom,
        /// Requestor's timestamp, echoed in the reply
        time: u32,
    },

    /// Conversion finished; `property` is None when it was refused
    Notify {
        /// Window that asked for the conversion
        requestor: WindowId,
        /// Selection that was converted
        selection: Atom,
        /// Format that was asked for
        target: Atom,
        /// Property holding the data, or [`NONE`]
        property: Atom,
        /// Timestamp of the request being answered
        time: u32,
    },

    /// `window` no longer owns `selection`
    Clear {
        /// Previous owner
        window: WindowId,
        /// Selection that was lost
        selection: Atom,
        /// Server time of the ownership change
        time: u32,
    },
}

/// One client connection to the windowing server
///
/// Each agent owns exactly one connection and never shares it across threads.
#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send {
    /// Intern `name`, creating the atom if needed
    fn intern_atom(&self, name: &str) -> TransportResult<Atom>;

    /// Look up the name of an atom
    fn atom_name(&self, atom: Atom) -> TransportResult<String>;

    /// Create an unmapped window owned by this connection
    fn create_window(&self, name: &str) -> TransportResult<WindowId>;

    /// Current owner of `selection`, or [`NONE`]
    fn selection_owner(&self, selection: Atom) -> TransportResult<WindowId>;

    /// Declare `window` (or [`NONE`]) as owner of `selection`
    fn set_selection_owner(
        &self,
        window: WindowId,
        selection: Atom,
        time: u32,
    ) -> TransportResult<()>;

    /// Ask the owner of `selection` to convert it into `requestor`'s `property`
    fn convert_selection(
        &self,
        requestor: WindowId,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: u32,
    ) -> TransportResult<()>;

    /// Read a property, optionally deleting it
    fn get_property(
        &self,
        window: WindowId,
        property: Atom,
        delete: bool,
    ) -> TransportResult<Option<Property>>;

    /// Replace a property
    fn change_property(
        &self,
        window: WindowId,
        property: Atom,
        value: Property,
    ) -> TransportResult<()>;

    /// Queue `event` for delivery to the client owning `destination`
    fn send_event(&self, destination: WindowId, event: SelectionEvent) -> TransportResult<()>;

    /// Deliver everything queued by [`send_event`](Self::send_event)
    fn flush(&self) -> TransportResult<()>;

    /// Inbound events for windows of this connection
    fn events(&self) -> Receiver<SelectionEvent>;
}

/// Factory for connections; agents reconnect through it after a failure
pub trait Transport: Send + Sync {
    /// Open a new connection identified as `client_name`
    fn connect(&self, client_name: &str) -> TransportResult<Box<dyn Connection>>;
}
