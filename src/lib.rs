//! # lamco-selection
//!
//! Clipboard access over a windowing server's selection protocol, with a
//! process-global clipboard store as an alternative backend.
//!
//! This crate provides:
//! - [`SelectionService`] - owns and fetches one selection (CLIPBOARD, PRIMARY, SECONDARY)
//! - [`NativeClipboard`] - the same operations over an open/empty/put clipboard store
//! - [`Clipboard`] - a handle over either backend, with text and rich-text helpers
//! - [`LocalDisplay`] - an in-process selection server for tests and embedding
//!
//! # Architecture
//!
//! ```text
//! lamco-selection
//!   ├─> Clipboard (backend chosen at construction)
//!   │     ├─> SelectionService
//!   │     │     ├─> Getter agent (fetch: convert, collect notifies)
//!   │     │     ├─> Setter agent (own, answer requests, hand off to manager)
//!   │     │     └─> Supervisor (rebuild setter, re-declare content)
//!   │     └─> NativeClipboard ──> NativeStore
//!   └─> Transport ──> Connection (atoms, properties, selection events)
//! ```
//!
//! # Data Flow
//!
//! **Get:** caller → getter agent → ConvertSelection → owner → SelectionNotify → caller
//!
//! **Set:** caller → setter agent → SetSelectionOwner; requestors ↔ setter agent
//!
//! **Store:** setter agent → CLIPBOARD_MANAGER (SAVE_TARGETS) → manager adopts CLIPBOARD
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lamco_selection::{Clipboard, LocalDisplay, SelectionConfig, SelectionKind};
//!
//! let display = LocalDisplay::new();
//! let writer = Clipboard::selection(
//!     Arc::new(display.clone()),
//!     SelectionKind::Clipboard,
//!     SelectionConfig { client_name: "writer".into(), ..Default::default() },
//! )?;
//! let reader = Clipboard::selection(
//!     Arc::new(display),
//!     SelectionKind::Clipboard,
//!     SelectionConfig { client_name: "reader".into(), ..Default::default() },
//! )?;
//!
//! writer.set_text("hello")?;
//! assert_eq!(reader.get_text()?.as_deref(), Some("hello"));
//! # Ok::<(), lamco_selection::SelectionError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Data model
// =============================================================================

/// Well-known target and selection names
pub mod atoms;

/// Content maps and `get` results
pub mod content;

/// HTML clipboard container
pub mod html;

/// Error types, classification and recovery policy
pub mod error;

// =============================================================================
// Backends
// =============================================================================

/// Selection-protocol backend
///
/// One getter and one setter agent per selection, each a dedicated thread
/// with its own connection, plus a supervisor that restores ownership after
/// a connection failure.
pub mod selection;

/// Process-global clipboard backend
pub mod native;

/// Backend trait and the [`Clipboard`] handle
pub mod backend;

/// Windowing-server connections
///
/// The [`transport::Connection`] trait is the protocol surface the agents
/// speak; [`transport::LocalDisplay`] implements it in-process.
pub mod transport;

// =============================================================================
// Ambient
// =============================================================================

/// Configuration loading and validation
pub mod config;

/// Tracing subscriber setup
pub mod logging;

pub use backend::{Clipboard, ClipboardBackend};
pub use config::{Config, LoggingConfig, SelectionConfig};
pub use content::{ContentMap, Payload, SelectionData, SelectionValue};
pub use error::{Result, RetryConfig, SelectionError, TransportError};
pub use html::{fragment_from_html, wrap_html};
pub use native::{MemoryNativeStore, NativeClipboard, NativeStore};
pub use selection::{SelectionKind, SelectionService};
pub use transport::{LocalDisplay, SelectionManagerStub, Transport};
