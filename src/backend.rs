//! Clipboard Backends
//!
//! [`ClipboardBackend`] is the surface shared by the selection protocol
//! ([`SelectionService`]) and the process-global clipboard
//! ([`NativeClipboard`]). [`Clipboard`] picks one at construction time.
//!
//! The text conveniences differ per backend:
//!
//! | Operation       | Selection                        | Native                        |
//! |-----------------|----------------------------------|-------------------------------|
//! | `set_text`      | `STRING` (ASCII) + `UTF8_STRING` | `CF_UNICODETEXT` (UTF-16LE)   |
//! | `set_rich_text` | adds `text/html` (UTF-8)         | adds `HTML Format` (CF_HTML)  |

use crate::atoms::{STRING, TEXT_HTML, UTF8_STRING};
use crate::config::SelectionConfig;
use crate::content::{ContentMap, Payload, SelectionData};
use crate::error::Result;
use crate::native::{NativeClipboard, NativeStore};
use crate::selection::{SelectionKind, SelectionService};
use crate::transport::Transport;
use std::sync::Arc;

/// Operations every clipboard backend provides
pub trait ClipboardBackend: Send + Sync {
    /// Fetch `targets`; every requested target appears in the result
    fn get(&self, targets: &[&str]) -> Result<SelectionData>;

    /// Publish `content`
    fn set(&self, content: ContentMap) -> Result<()>;

    /// Drop published content
    fn clear(&self) -> Result<()>;

    /// Hand content over so it outlives this process
    fn store(&self) -> Result<()>;

    /// Wrap an HTML fragment in the CF_HTML container
    fn wrap_html(&self, fragment: &str) -> Vec<u8> {
        crate::html::wrap_html(fragment)
    }

    /// Current text, if any
    fn get_text(&self) -> Result<Option<String>>;

    /// Publish `text`
    fn set_text(&self, text: &str) -> Result<()>;

    /// Current `(text, html)` pair
    fn get_rich_text(&self) -> Result<(Option<String>, Option<String>)>;

    /// Publish text and HTML together; empty halves are left out
    fn set_rich_text(&self, text: &str, html: &str) -> Result<()>;
}

/// Clipboard handle over a chosen backend
pub struct Clipboard {
    backend: Box<dyn ClipboardBackend>,
}

impl Clipboard {
    /// Wrap an existing backend
    pub fn new(backend: impl ClipboardBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Selection-protocol clipboard on `transport`
    pub fn selection(
        transport: Arc<dyn Transport>,
        kind: SelectionKind,
        config: SelectionConfig,
    ) -> Result<Self> {
        Ok(Self::new(SelectionService::new(transport, kind, config)?))
    }

    /// Process-global clipboard backed by `store`
    ///
    /// Opening the store is retried with `config.store_open_retry`.
    pub fn native(store: impl NativeStore + 'static, config: &SelectionConfig) -> Self {
        Self::new(NativeClipboard::from_config(store, config))
    }

    /// Underlying backend
    pub fn backend(&self) -> &dyn ClipboardBackend {
        &*self.backend
    }

    /// See [`ClipboardBackend::get`]
    pub fn get(&self, targets: &[&str]) -> Result<SelectionData> {
        self.backend.get(targets)
    }

    /// See [`ClipboardBackend::set`]
    pub fn set(&self, content: ContentMap) -> Result<()> {
        self.backend.set(content)
    }

    /// See [`ClipboardBackend::clear`]
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    /// See [`ClipboardBackend::store`]
    pub fn store(&self) -> Result<()> {
        self.backend.store()
    }

    /// See [`ClipboardBackend::wrap_html`]
    pub fn wrap_html(&self, fragment: &str) -> Vec<u8> {
        self.backend.wrap_html(fragment)
    }

    /// See [`ClipboardBackend::get_text`]
    pub fn get_text(&self) -> Result<Option<String>> {
        self.backend.get_text()
    }

    /// See [`ClipboardBackend::set_text`]
    pub fn set_text(&self, text: &str) -> Result<()> {
        self.backend.set_text(text)
    }

    /// See [`ClipboardBackend::get_rich_text`]
    pub fn get_rich_text(&self) -> Result<(Option<String>, Option<String>)> {
        self.backend.get_rich_text()
    }

    /// See [`ClipboardBackend::set_rich_text`]
    pub fn set_rich_text(&self, text: &str, html: &str) -> Result<()> {
        self.backend.set_rich_text(text, html)
    }
}

impl ClipboardBackend for SelectionService {
    fn get(&self, targets: &[&str]) -> Result<SelectionData> {
        SelectionService::get(self, targets)
    }

    fn set(&self, content: ContentMap) -> Result<()> {
        SelectionService::set(self, content)
    }

    fn clear(&self) -> Result<()> {
        SelectionService::clear(self)
    }

    fn store(&self) -> Result<()> {
        SelectionService::store(self)
    }

    fn get_text(&self) -> Result<Option<String>> {
        let data = SelectionService::get(self, &[STRING, UTF8_STRING])?;
        Ok(text_from_selection(&data))
    }

    fn set_text(&self, text: &str) -> Result<()> {
        SelectionService::set(self, text_content(text)?)
    }

    fn get_rich_text(&self) -> Result<(Option<String>, Option<String>)> {
        let data = SelectionService::get(self, &[STRING, UTF8_STRING, TEXT_HTML])?;
        let html = data.bytes(TEXT_HTML).and_then(decode_html);
        Ok((text_from_selection(&data), html))
    }

    fn set_rich_text(&self, text: &str, html: &str) -> Result<()> {
        let mut content = if text.is_empty() {
            ContentMap::new()
        } else {
            text_content(text)?
        };
        if !html.is_empty() {
            content.insert(TEXT_HTML, Some(Payload::from(html)))?;
        }
        SelectionService::set(self, content)
    }
}

fn text_content(text: &str) -> Result<ContentMap> {
    let ascii: Vec<u8> = text.bytes().filter(u8::is_ascii).collect();
    ContentMap::new().with(STRING, ascii)?.with(UTF8_STRING, text)
}

/// UTF8_STRING when answered, otherwise the ASCII part of STRING
///
/// Undecodable UTF8_STRING data reads as no text.
fn text_from_selection(data: &SelectionData) -> Option<String> {
    if let Some(utf8) = data.bytes(UTF8_STRING) {
        return String::from_utf8(utf8.to_vec()).ok();
    }

    let ascii: String = data
        .bytes(STRING)?
        .iter()
        .filter(|b| b.is_ascii())
        .map(|b| char::from(*b))
        .collect();
    (!ascii.is_empty()).then_some(ascii)
}

/// HTML arrives as UTF-8 from most owners and UTF-16LE from some browsers
fn decode_html(data: &[u8]) -> Option<String> {
    let html = match std::str::from_utf8(data) {
        Ok(html) => html.to_string(),
        Err(_) => decode_utf16le_strict(data)
            .unwrap_or_else(|| String::from_utf8_lossy(data).into_owned()),
    };
    (!html.is_empty()).then_some(html)
}

fn decode_utf16le_strict(data: &[u8]) -> Option<String> {
    if data.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Encode `text` as UTF-16LE without terminator
pub(crate) fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16LE text, dropping trailing NULs
pub(crate) fn decode_utf16le(data: &[u8]) -> Option<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16_lossy(&units);
    let text = text.trim_end_matches('\0');
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SelectionValue;
    use crate::native::MemoryNativeStore;

    fn resolved(entries: &[(&str, &[u8])]) -> SelectionData {
        let names: Vec<&str> = entries.iter().map(|(name, _)| *name).collect();
        let mut data = SelectionData::unresolved(&names);
        for (name, bytes) in entries {
            data.resolve(name, Some(SelectionValue::Bytes(bytes.to_vec())));
        }
        data
    }

    #[test]
    fn test_text_content_targets() {
        let content = text_content("café").unwrap();

        assert_eq!(content.get(STRING).unwrap().as_bytes(), b"caf");
        assert_eq!(content.get(UTF8_STRING).unwrap().as_bytes(), "café".as_bytes());
    }

    #[test]
    fn test_text_prefers_utf8() {
        let data = resolved(&[(STRING, b"plain"), (UTF8_STRING, "ünïcode".as_bytes())]);
        assert_eq!(text_from_selection(&data).as_deref(), Some("ünïcode"));

        let data = resolved(&[(STRING, b"pl\xffain")]);
        assert_eq!(text_from_selection(&data).as_deref(), Some("plain"));

        let data = resolved(&[(UTF8_STRING, b"\xff\xfe")]);
        assert_eq!(text_from_selection(&data), None);

        assert_eq!(text_from_selection(&SelectionData::unresolved(&[STRING])), None);
    }

    #[test]
    fn test_decode_html_fallbacks() {
        assert_eq!(decode_html(b"<b>x</b>").as_deref(), Some("<b>x</b>"));

        let utf16 = encode_utf16le("<i>ü</i>");
        assert_eq!(decode_html(&utf16).as_deref(), Some("<i>ü</i>"));

        assert_eq!(decode_html(b"<b>\xff</b>").as_deref(), Some("<b>\u{fffd}</b>"));
    }

    #[test]
    fn test_utf16le_helpers() {
        assert!(encode_utf16le("").is_empty());
        assert_eq!(encode_utf16le("A"), vec![0x41, 0x00]);
        assert_eq!(decode_utf16le(&[0x41, 0x00, 0x00, 0x00]).as_deref(), Some("A"));
        assert_eq!(decode_utf16le(&[0x00, 0x00]), None);
    }

    #[test]
    fn test_clipboard_delegates_to_backend() {
        let clipboard = Clipboard::native(MemoryNativeStore::new(), &SelectionConfig::default());

        clipboard.set_text("hello").unwrap();
        assert_eq!(clipboard.get_text().unwrap().as_deref(), Some("hello"));
        assert_eq!(clipboard.wrap_html("x"), crate::html::wrap_html("x"));

        clipboard.clear().unwrap();
        assert_eq!(clipboard.get_text().unwrap(), None);
        assert!(clipboard.store().is_err());
    }
}
