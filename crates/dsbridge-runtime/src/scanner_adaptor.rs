//! Single-pass, disposable wrapper around a [`Scanner`].
//!
//! The host pulls batches one at a time with [`DisposableScannerAdaptor::next`]
//! until it sees end-of-stream. The adaptor is never rewound: once exhausted
//! it keeps reporting end-of-stream, and once closed every pull fails.

use std::sync::{Mutex, MutexGuard};

use arrow::record_batch::RecordBatch;
use dsbridge_engine::{Scanner, TaggedRecordBatchIterator};
use dsbridge_types::{BridgeError, HandleKind};

use crate::exchange::normalize_offsets;
use crate::registry::NativeObject;

/// Lifecycle of a [`DisposableScannerAdaptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptorState {
    /// Created, no batch pulled yet.
    Unconsumed,
    /// At least one batch pulled, more may follow.
    Consuming,
    /// End-of-stream or a scan error was reached.
    Exhausted,
    /// Closed by the host.
    Released,
}

struct Inner {
    state: AdaptorState,
    batches: Option<TaggedRecordBatchIterator>,
}

/// Owns one scanner and the single batch iterator derived from it.
pub struct DisposableScannerAdaptor {
    scanner: Scanner,
    inner: Mutex<Inner>,
}

impl NativeObject for DisposableScannerAdaptor {
    const KIND: HandleKind = HandleKind::Scanner;
}

impl DisposableScannerAdaptor {
    /// Start the scan. Fragments are opened lazily on the first pulls.
    #[must_use]
    pub fn create(scanner: Scanner) -> Self {
        let batches = scanner.scan_batches();
        Self {
            scanner,
            inner: Mutex::new(Inner {
                state: AdaptorState::Unconsumed,
                batches: Some(batches),
            }),
        }
    }

    #[must_use]
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// # Errors
    ///
    /// Returns an error if the adaptor mutex is poisoned.
    pub fn state(&self) -> Result<AdaptorState, BridgeError> {
        Ok(self.lock()?.state)
    }

    /// Pull the next batch, with every column at offset 0.
    ///
    /// Returns `Ok(None)` at end-of-stream, and on every call after that.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` after [`DisposableScannerAdaptor::close`], or the
    /// scan's failure. A failed scan is exhausted.
    pub fn next(&self) -> Result<Option<RecordBatch>, BridgeError> {
        let mut inner = self.lock()?;
        match inner.state {
            AdaptorState::Released => {
                return Err(BridgeError::not_found(
                    "SCANNER_CLOSED",
                    "Scanner has been closed",
                ))
            }
            AdaptorState::Exhausted => return Ok(None),
            AdaptorState::Unconsumed | AdaptorState::Consuming => {}
        }
        inner.state = AdaptorState::Consuming;

        let pulled = inner.batches.as_mut().and_then(Iterator::next);
        match pulled {
            Some(Ok(tagged)) => {
                let pool = &self.scanner.options().pool;
                match normalize_offsets(&tagged.record_batch, pool) {
                    Ok(batch) => Ok(Some(batch)),
                    Err(e) => {
                        exhaust(&mut inner);
                        Err(e.into())
                    }
                }
            }
            Some(Err(e)) => {
                exhaust(&mut inner);
                tracing::debug!(error = %e, "scan failed");
                Err(e.into())
            }
            None => {
                exhaust(&mut inner);
                tracing::debug!("scan exhausted");
                Ok(None)
            }
        }
    }

    /// Abandon iteration. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the adaptor mutex is poisoned.
    pub fn close(&self) -> Result<(), BridgeError> {
        let batches = {
            let mut inner = self.lock()?;
            inner.state = AdaptorState::Released;
            inner.batches.take()
        };
        drop(batches);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, BridgeError> {
        self.inner
            .lock()
            .map_err(|_| BridgeError::engine("MUTEX_POISONED", "scanner adaptor mutex poisoned"))
    }
}

fn exhaust(inner: &mut Inner) {
    inner.state = AdaptorState::Exhausted;
    inner.batches = None;
}
