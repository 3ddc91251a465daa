//! Selection Content Model
//!
//! Content maps declared by `set`, and the results returned by `get`.

use crate::error::{Result, SelectionError};
use bytes::Bytes;
use serde_json::Value;

/// Legacy binary formats that cannot be transferred as opaque bytes
pub const UNSUPPORTED_TARGETS: &[&str] = &[
    "CF_BITMAP",
    "CF_DIB",
    "CF_DIBV5",
    "CF_DIF",
    "CF_DSPBITMAP",
    "CF_DSPENHMETAFILE",
    "CF_DSPMETAFILEPICT",
    "CF_DSPTEXT",
    "CF_ENHMETAFILE",
    "CF_GDIOBJFIRST",
    "CF_GDIOBJLAST",
    "CF_HDROP",
    "CF_LOCALE",
    "CF_METAFILEPICT",
    "CF_OWNERDISPLAY",
    "CF_PALETTE",
    "CF_PENDATA",
    "CF_RIFF",
    "CF_SYLK",
    "CF_TIFF",
    "CF_WAVE",
];

/// Returns true if `target` is on the legacy binary denylist
pub fn is_unsupported_target(target: &str) -> bool {
    UNSUPPORTED_TARGETS.contains(&target)
}

/// A declared value for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text, sent as UTF-8
    Text(String),
    /// Opaque bytes
    Bytes(Bytes),
}

impl Payload {
    /// Wire representation
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    /// Returns true if the payload carries no data
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

/// Ordered mapping of target name to payload
///
/// `None` declares a target without data. Inserting an existing target
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMap {
    entries: Vec<(String, Option<Payload>)>,
}

impl ContentMap {
    /// Create an empty content map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target
    ///
    /// # Errors
    ///
    /// `UnsupportedTarget` for legacy binary formats.
    pub fn insert(&mut self, target: impl Into<String>, payload: Option<Payload>) -> Result<()> {
        let target = target.into();
        if is_unsupported_target(&target) {
            return Err(SelectionError::UnsupportedTarget(target));
        }

        match self.entries.iter_mut().find(|(name, _)| *name == target) {
            Some(entry) => entry.1 = payload,
            None => self.entries.push((target, payload)),
        }
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, target: impl Into<String>, payload: impl Into<Payload>) -> Result<Self> {
        self.insert(target, Some(payload.into()))?;
        Ok(self)
    }

    /// Build from `(target, payload)` pairs
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Option<Payload>)>,
        K: Into<String>,
    {
        let mut map = Self::new();
        for (target, payload) in pairs {
            map.insert(target, payload)?;
        }
        Ok(map)
    }

    /// Build from a JSON object
    ///
    /// Strings become text, arrays of byte values become bytes, null declares
    /// the target without data. Anything else is `InvalidPayload`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| SelectionError::InvalidPayload {
            target: String::new(),
            reason: format!("content must be an object, got {}", json_kind(value)),
        })?;

        let mut map = Self::new();
        for (target, value) in object {
            let payload = match value {
                Value::Null => None,
                Value::String(text) => Some(Payload::Text(text.clone())),
                Value::Array(items) => Some(Payload::from(json_bytes(target, items)?)),
                other => {
                    return Err(SelectionError::InvalidPayload {
                        target: target.clone(),
                        reason: format!("expected text, bytes or null, got {}", json_kind(other)),
                    })
                }
            };
            map.insert(target.as_str(), payload)?;
        }
        Ok(map)
    }

    /// Payload for `target`, if declared with data
    pub fn get(&self, target: &str) -> Option<&Payload> {
        self.entries
            .iter()
            .find(|(name, _)| name == target)
            .and_then(|(_, payload)| payload.as_ref())
    }

    /// Returns true if `target` is declared, with or without data
    pub fn contains(&self, target: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == target)
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Payload>)> {
        self.entries
            .iter()
            .map(|(name, payload)| (name.as_str(), payload.as_ref()))
    }

    /// Targets declared with data, in declaration order
    pub fn save_list(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, payload)| payload.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Number of declared targets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn json_bytes(target: &str, items: &[Value]) -> Result<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| SelectionError::InvalidPayload {
                    target: target.to_string(),
                    reason: format!("byte array contains {item}"),
                })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A value returned by `get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionValue {
    /// Raw data for a regular target
    Bytes(Vec<u8>),
    /// Target names advertised in answer to TARGETS
    Targets(Vec<String>),
}

impl SelectionValue {
    /// Data, if this is not a target list
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            Self::Targets(_) => None,
        }
    }

    /// Target list, if this answers TARGETS
    pub fn as_targets(&self) -> Option<&[String]> {
        match self {
            Self::Targets(targets) => Some(targets),
            Self::Bytes(_) => None,
        }
    }
}

/// Result of `get`: one entry per requested target, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionData {
    entries: Vec<(String, Option<SelectionValue>)>,
}

impl SelectionData {
    /// All-null result for `targets`; duplicates collapse to one entry
    pub fn unresolved<S: AsRef<str>>(targets: &[S]) -> Self {
        let mut data = Self::default();
        for target in targets {
            let target = target.as_ref();
            if !data.entries.iter().any(|(name, _)| name == target) {
                data.entries.push((target.to_string(), None));
            }
        }
        data
    }

    /// Record the answer for `target`; unknown targets are ignored
    pub fn resolve(&mut self, target: &str, value: Option<SelectionValue>) {
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| name == target) {
            entry.1 = value;
        }
    }

    /// Value for `target`; `None` when absent or unanswered
    pub fn get(&self, target: &str) -> Option<&SelectionValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == target)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Data for `target`
    pub fn bytes(&self, target: &str) -> Option<&[u8]> {
        self.get(target).and_then(SelectionValue::as_bytes)
    }

    /// Returns true if `target` was requested
    pub fn contains(&self, target: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == target)
    }

    /// Entries in request order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&SelectionValue>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no target was requested
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-declarable content: answered data targets, in request order
    pub fn into_content(self) -> ContentMap {
        let entries = self
            .entries
            .into_iter()
            .filter_map(|(name, value)| match value {
                Some(SelectionValue::Bytes(data)) if !is_unsupported_target(&name) => {
                    Some((name, Some(Payload::from(data))))
                }
                _ => None,
            })
            .collect();
        ContentMap { entries }
    }
}
