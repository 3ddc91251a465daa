//! Setter recovery thread
//!
//! Setter workers that die while serving requests (no caller waiting on
//! them) post a [`FaultNotice`]. The supervisor rebuilds the setter and
//! re-declares the last content so ownership comes back without anyone
//! calling `set` again.

use super::setter::FaultNotice;
use super::{SelectionKind, ServiceShared};
use crate::error::{Result, TransportError};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub(super) struct Supervisor {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub(super) fn spawn(
        shared: Weak<ServiceShared>,
        fault_rx: Receiver<FaultNotice>,
        kind: SelectionKind,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let thread_handle = thread::Builder::new()
            .name(format!("selection-supervisor-{}", kind))
            .spawn(move || run(shared, fault_rx, shutdown_rx))
            .map_err(|e| TransportError::Send(format!("supervisor thread spawn failed: {}", e)))?;

        Ok(Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Supervisor thread panicked");
            }
        }
    }
}

fn run(shared: Weak<ServiceShared>, fault_rx: Receiver<FaultNotice>, shutdown_rx: Receiver<()>) {
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(fault_rx) -> notice => {
                let Ok(notice) = notice else {
                    break;
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.recover_setter(notice);
            }
        }
    }

    debug!("Supervisor stopped");
}
