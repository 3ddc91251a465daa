//! Well-known atom names and a per-connection atom cache

use crate::transport::{Atom, Connection, TransportResult};
use std::collections::HashMap;

/// Latin-1 text
pub const STRING: &str = "STRING";
/// UTF-8 text
pub const UTF8_STRING: &str = "UTF8_STRING";
/// HTML markup
pub const TEXT_HTML: &str = "text/html";

/// Target enumeration pseudo-target
pub const TARGETS: &str = "TARGETS";
/// Batched conversion pseudo-target
pub const MULTIPLE: &str = "MULTIPLE";
/// Persistence request pseudo-target
pub const SAVE_TARGETS: &str = "SAVE_TARGETS";
/// Selection owned by the Selection Manager
pub const CLIPBOARD_MANAGER: &str = "CLIPBOARD_MANAGER";
/// Property carrying the Save List during hand-off
pub const LAMCO_SELECTION: &str = "LAMCO_SELECTION";

/// Property type of atom lists
pub const ATOM: &str = "ATOM";
/// Property type of MULTIPLE pair lists
pub const ATOM_PAIR: &str = "ATOM_PAIR";

/// Pseudo-targets every owner advertises, in advertisement order
pub const PSEUDO_TARGETS: [&str; 3] = [TARGETS, MULTIPLE, SAVE_TARGETS];

/// Name/atom cache for one connection
///
/// Atoms are server-global, but the cache lives with the connection that
/// filled it so a reconnect starts clean.
#[derive(Debug, Default)]
pub(crate) struct AtomCache {
    by_name: HashMap<String, Atom>,
    by_atom: HashMap<Atom, String>,
}

impl AtomCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atom for `name`, interning on first use
    pub(crate) fn intern(&mut self, conn: &dyn Connection, name: &str) -> TransportResult<Atom> {
        if let Some(atom) = self.by_name.get(name) {
            return Ok(*atom);
        }

        let atom = conn.intern_atom(name)?;
        self.by_name.insert(name.to_string(), atom);
        self.by_atom.insert(atom, name.to_string());
        Ok(atom)
    }

    /// Name of `atom`, asking the server on first use
    pub(crate) fn name(&mut self, conn: &dyn Connection, atom: Atom) -> TransportResult<String> {
        if let Some(name) = self.by_atom.get(&atom) {
            return Ok(name.clone());
        }

        let name = conn.atom_name(atom)?;
        self.by_name.insert(name.clone(), atom);
        self.by_atom.insert(atom, name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnection;

    #[test]
    fn test_intern_asks_server_once() {
        let mut conn = MockConnection::new();
        conn.expect_intern_atom()
            .withf(|name| name == TARGETS)
            .times(1)
            .returning(|_| Ok(7));

        let mut cache = AtomCache::new();
        assert_eq!(cache.intern(&conn, TARGETS).unwrap(), 7);
        assert_eq!(cache.intern(&conn, TARGETS).unwrap(), 7);
        assert_eq!(cache.name(&conn, 7).unwrap(), TARGETS);
    }

    #[test]
    fn test_name_lookup_error_propagates() {
        let mut conn = MockConnection::new();
        conn.expect_atom_name()
            .returning(|atom| Err(crate::error::TransportError::BadIdentifier(atom)));

        let mut cache = AtomCache::new();
        match cache.name(&conn, 99) {
            Err(crate::error::TransportError::BadIdentifier(99)) => {}
            other => panic!("Expected BadIdentifier, got {:?}", other),
        }
    }
}
