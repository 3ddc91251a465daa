//! In-memory clipboard store
//!
//! Behaves like a process-global clipboard: clones share one store, only one
//! holder can have it open at a time, and registered format ids start in the
//! registered-format range.

use super::NativeStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// First id handed out by `register_format`
const FIRST_REGISTERED_FORMAT: u32 = 0xC000;

#[derive(Debug)]
struct StoreState {
    open: bool,
    formats: Vec<(u32, Vec<u8>)>,
    registered: HashMap<String, u32>,
    next_format: u32,
    failing_opens: u32,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            open: false,
            formats: Vec::new(),
            registered: HashMap::new(),
            next_format: FIRST_REGISTERED_FORMAT,
            failing_opens: 0,
        }
    }
}

/// Shared in-memory [`NativeStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryNativeStore {
    state: Arc<Mutex<StoreState>>,
    holding: bool,
}

impl MemoryNativeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail as if another process held the store
    pub fn fail_opens(&self, count: u32) {
        self.state.lock().failing_opens = count;
    }

    /// Raw stored data for `id`, trailing NUL included
    pub fn data(&self, id: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .formats
            .iter()
            .find(|(format, _)| *format == id)
            .map(|(_, data)| data.clone())
    }
}

impl NativeStore for MemoryNativeStore {
    fn open(&mut self) -> bool {
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return false;
        }
        if state.open {
            return false;
        }
        state.open = true;
        self.holding = true;
        true
    }

    fn close(&mut self) {
        if self.holding {
            self.state.lock().open = false;
            self.holding = false;
        }
    }

    fn empty(&mut self) {
        self.state.lock().formats.clear();
    }

    fn register_format(&mut self, name: &str) -> u32 {
        let mut state = self.state.lock();
        if let Some(id) = state.registered.get(name) {
            return *id;
        }
        let id = state.next_format;
        state.next_format += 1;
        state.registered.insert(name.to_string(), id);
        id
    }

    fn format_name(&self, id: u32) -> Option<String> {
        self.state
            .lock()
            .registered
            .iter()
            .find(|(_, registered)| **registered == id)
            .map(|(name, _)| name.clone())
    }

    fn enum_formats(&self) -> Vec<u32> {
        self.state.lock().formats.iter().map(|(id, _)| *id).collect()
    }

    fn is_format_available(&self, id: u32) -> bool {
        self.state.lock().formats.iter().any(|(format, _)| *format == id)
    }

    fn get_data(&self, id: u32) -> Option<Vec<u8>> {
        self.data(id)
    }

    fn set_data(&mut self, id: u32, data: Vec<u8>) {
        let mut state = self.state.lock();
        match state.formats.iter_mut().find(|(format, _)| *format == id) {
            Some(entry) => entry.1 = data,
            None => state.formats.push((id, data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let mut first = MemoryNativeStore::new();
        let mut second = first.clone();

        assert!(first.open());
        assert!(!second.open());
        second.close();
        assert!(!second.open());

        first.close();
        assert!(second.open());
    }

    #[test]
    fn test_register_format_is_stable() {
        let mut store = MemoryNativeStore::new();
        let html = store.register_format("HTML Format");
        let other = store.register_format("Other");

        assert_eq!(html, FIRST_REGISTERED_FORMAT);
        assert_ne!(html, other);
        assert_eq!(store.register_format("HTML Format"), html);
        assert_eq!(store.format_name(other).as_deref(), Some("Other"));
        assert_eq!(store.format_name(1), None);
    }

    #[test]
    fn test_set_data_keeps_order() {
        let mut store = MemoryNativeStore::new();
        store.set_data(13, b"a".to_vec());
        store.set_data(1, b"b".to_vec());
        store.set_data(13, b"c".to_vec());

        assert_eq!(store.enum_formats(), vec![13, 1]);
        assert_eq!(store.get_data(13), Some(b"c".to_vec()));

        store.empty();
        assert!(!store.is_format_available(1));
    }
}
