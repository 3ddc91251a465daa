//! Native Clipboard Variant
//!
//! Clipboard access for platforms with a single process-global clipboard
//! store (open, empty, put formatted data, close) instead of a selection
//! protocol. The store itself is behind [`NativeStore`].
//!
//! # Formats
//!
//! Standard formats are addressed by their fixed ids; any other target name
//! is registered with the store and addressed by the id it hands back.
//! Legacy binary formats (bitmaps, metafiles, palettes, ...) are refused
//! with `UnsupportedTarget`.
//!
//! Data is stored with a trailing NUL, as the platform's global-memory
//! convention expects; `get` removes it again.

use crate::atoms::TARGETS;
use crate::backend::{decode_utf16le, encode_utf16le, ClipboardBackend};
use crate::config::SelectionConfig;
use crate::content::{is_unsupported_target, ContentMap, SelectionData, SelectionValue};
use crate::error::{Result, RetryConfig, SelectionError};
use crate::html::{fragment_from_html, wrap_html};
use parking_lot::Mutex;
use std::thread;
use tracing::{debug, trace};

pub mod memory;

pub use memory::MemoryNativeStore;

/// Plain 8-bit text
pub const CF_TEXT: u32 = 1;
/// OEM character set text
pub const CF_OEMTEXT: u32 = 7;
/// UTF-16LE text
pub const CF_UNICODETEXT: u32 = 13;
/// First private format id
pub const CF_PRIVATEFIRST: u32 = 0x0200;
/// Last private format id
pub const CF_PRIVATELAST: u32 = 0x02FF;

/// Name of the UTF-16LE text format
pub const UNICODE_TEXT: &str = "CF_UNICODETEXT";
/// Name of the rich-text container format
pub const HTML_FORMAT: &str = "HTML Format";

/// Transferable standard formats addressed by fixed id
const STANDARD_FORMATS: &[(&str, u32)] = &[
    ("CF_TEXT", CF_TEXT),
    ("CF_OEMTEXT", CF_OEMTEXT),
    (UNICODE_TEXT, CF_UNICODETEXT),
    ("CF_PRIVATEFIRST", CF_PRIVATEFIRST),
    ("CF_PRIVATELAST", CF_PRIVATELAST),
];

/// Names of every predefined format id, used when enumerating
const PREDEFINED_NAMES: &[(u32, &str)] = &[
    (1, "CF_TEXT"),
    (2, "CF_BITMAP"),
    (3, "CF_METAFILEPICT"),
    (4, "CF_SYLK"),
    (5, "CF_DIF"),
    (6, "CF_TIFF"),
    (7, "CF_OEMTEXT"),
    (8, "CF_DIB"),
    (9, "CF_PALETTE"),
    (10, "CF_PENDATA"),
    (11, "CF_RIFF"),
    (12, "CF_WAVE"),
    (13, "CF_UNICODETEXT"),
    (14, "CF_ENHMETAFILE"),
    (15, "CF_HDROP"),
    (16, "CF_LOCALE"),
    (17, "CF_DIBV5"),
    (0x0080, "CF_OWNERDISPLAY"),
    (0x0081, "CF_DSPTEXT"),
    (0x0082, "CF_DSPBITMAP"),
    (0x0083, "CF_DSPMETAFILEPICT"),
    (0x008E, "CF_DSPENHMETAFILE"),
    (0x0200, "CF_PRIVATEFIRST"),
    (0x02FF, "CF_PRIVATELAST"),
    (0x0300, "CF_GDIOBJFIRST"),
    (0x03FF, "CF_GDIOBJLAST"),
];

/// Process-global clipboard store
///
/// Mirrors the platform API: the store must be opened before use and closed
/// afterwards, and `open` fails while another user holds it.
pub trait NativeStore: Send {
    /// Try to open the store; false if it is held elsewhere
    fn open(&mut self) -> bool;

    /// Close the store
    fn close(&mut self);

    /// Remove every format
    fn empty(&mut self);

    /// Id for a custom format name; the same name always gets the same id
    fn register_format(&mut self, name: &str) -> u32;

    /// Name of a registered format
    fn format_name(&self, id: u32) -> Option<String>;

    /// Ids currently holding data, in the order they were set
    fn enum_formats(&self) -> Vec<u32>;

    /// Returns true if `id` holds data
    fn is_format_available(&self, id: u32) -> bool;

    /// Raw data for `id`
    fn get_data(&self, id: u32) -> Option<Vec<u8>>;

    /// Replace the data for `id`
    fn set_data(&mut self, id: u32, data: Vec<u8>);
}

/// Clipboard backed by a [`NativeStore`]
pub struct NativeClipboard {
    store: Mutex<Box<dyn NativeStore>>,
    open_retry: RetryConfig,
}

impl NativeClipboard {
    /// Wrap `store`, retrying `open` with the given back-off
    pub fn new(store: impl NativeStore + 'static, open_retry: RetryConfig) -> Self {
        Self {
            store: Mutex::new(Box::new(store)),
            open_retry,
        }
    }

    /// Wrap `store` using the open back-off from `config`
    pub fn from_config(store: impl NativeStore + 'static, config: &SelectionConfig) -> Self {
        Self::new(store, config.store_open_retry.clone())
    }

    /// Fetch `targets`; TARGETS enumerates the formats present
    pub fn get(&self, targets: &[&str]) -> Result<SelectionData> {
        if let Some(target) = targets.iter().find(|t| is_unsupported_target(t)) {
            return Err(SelectionError::UnsupportedTarget(target.to_string()));
        }

        let mut data = SelectionData::unresolved(targets);

        self.with_open_store(|store| {
            let names: Vec<String> = data.iter().map(|(name, _)| name.to_string()).collect();
            for name in names {
                let value = if name == TARGETS {
                    Some(SelectionValue::Targets(enumerate(store)))
                } else {
                    let id = format_id(store, &name);
                    read_format(store, id).map(SelectionValue::Bytes)
                };
                data.resolve(&name, value);
            }
        })?;

        Ok(data)
    }

    /// Replace the store's contents with `content`
    ///
    /// Null and empty payloads are not stored.
    pub fn set(&self, content: &ContentMap) -> Result<()> {
        self.with_open_store(|store| {
            let formats: Vec<(u32, Vec<u8>)> = content
                .iter()
                .filter_map(|(name, payload)| payload.filter(|p| !p.is_empty()).map(|p| (name, p)))
                .map(|(name, payload)| {
                    let mut data = Vec::with_capacity(payload.as_bytes().len() + 1);
                    data.extend_from_slice(payload.as_bytes());
                    data.push(0);
                    (format_id(store, name), data)
                })
                .collect();

            store.empty();
            for (id, data) in formats {
                trace!("Storing {} bytes as format {}", data.len(), id);
                store.set_data(id, data);
            }
        })
    }

    /// Empty the store
    pub fn clear(&self) -> Result<()> {
        self.with_open_store(|store| store.empty())
    }

    fn with_open_store<T>(&self, f: impl FnOnce(&mut dyn NativeStore) -> T) -> Result<T> {
        let mut store = self.store.lock();
        let mut attempt = 0;

        while !store.open() {
            if attempt >= self.open_retry.max_retries {
                return Err(SelectionError::NativeStoreUnavailable(attempt + 1));
            }
            let delay = self.open_retry.delay_for_attempt(attempt);
            debug!("Clipboard store busy, retrying in {:?}", delay);
            thread::sleep(delay);
            attempt += 1;
        }

        let result = f(store.as_mut());
        store.close();
        Ok(result)
    }
}

fn format_id(store: &mut dyn NativeStore, name: &str) -> u32 {
    STANDARD_FORMATS
        .iter()
        .find(|(standard, _)| *standard == name)
        .map(|(_, id)| *id)
        .unwrap_or_else(|| store.register_format(name))
}

fn read_format(store: &dyn NativeStore, id: u32) -> Option<Vec<u8>> {
    if !store.is_format_available(id) {
        return None;
    }

    let mut data = store.get_data(id)?;
    if data.last() == Some(&0) {
        data.pop();
    }
    (!data.is_empty()).then_some(data)
}

fn enumerate(store: &dyn NativeStore) -> Vec<String> {
    store
        .enum_formats()
        .into_iter()
        .filter_map(|id| {
            PREDEFINED_NAMES
                .iter()
                .find(|(predefined, _)| *predefined == id)
                .map(|(_, name)| name.to_string())
                .or_else(|| store.format_name(id))
        })
        .collect()
}

impl ClipboardBackend for NativeClipboard {
    fn get(&self, targets: &[&str]) -> Result<SelectionData> {
        NativeClipboard::get(self, targets)
    }

    fn set(&self, content: ContentMap) -> Result<()> {
        NativeClipboard::set(self, &content)
    }

    fn clear(&self) -> Result<()> {
        NativeClipboard::clear(self)
    }

    fn store(&self) -> Result<()> {
        Err(SelectionError::Unsupported("store"))
    }

    fn get_text(&self) -> Result<Option<String>> {
        let data = NativeClipboard::get(self, &[UNICODE_TEXT])?;
        Ok(data.bytes(UNICODE_TEXT).and_then(decode_utf16le))
    }

    fn set_text(&self, text: &str) -> Result<()> {
        let content = ContentMap::new().with(UNICODE_TEXT, encode_utf16le(text))?;
        NativeClipboard::set(self, &content)
    }

    fn get_rich_text(&self) -> Result<(Option<String>, Option<String>)> {
        let data = NativeClipboard::get(self, &[HTML_FORMAT, UNICODE_TEXT])?;
        let html = data.bytes(HTML_FORMAT).and_then(fragment_from_html);
        let text = data.bytes(UNICODE_TEXT).and_then(decode_utf16le);
        Ok((text, html))
    }

    fn set_rich_text(&self, text: &str, html: &str) -> Result<()> {
        let mut content = ContentMap::new();
        if !html.is_empty() {
            content.insert(HTML_FORMAT, Some(wrap_html(html).into()))?;
        }
        if !text.is_empty() {
            content.insert(UNICODE_TEXT, Some(encode_utf16le(text).into()))?;
        }
        NativeClipboard::set(self, &content)
    }
}
