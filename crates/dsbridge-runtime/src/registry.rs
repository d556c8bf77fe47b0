//! Opaque-handle registry for native objects referenced by the host.
//!
//! Every object the host can hold (dataset factories, datasets, scanners,
//! buffers, memory pools) lives here behind a 64-bit handle. The host owns
//! exactly one registry share per handle and gives it up with a single
//! `release`. Native code that needs the object past that point keeps its
//! own `Arc`.
//!
//! Handles are kind-checked: looking up a scanner handle as a dataset is an
//! `InvalidArgument` error and leaves the entry untouched.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dsbridge_types::{BridgeError, Handle, HandleKind};
use serde_json::json;

/// A type that can be stored in the registry.
pub trait NativeObject: Any + Send + Sync {
    const KIND: HandleKind;
}

struct Entry {
    kind: HandleKind,
    object: Arc<dyn Any + Send + Sync>,
    pinned: bool,
}

/// Thread-safe handle table. Handles start at 1 (0 is the null handle) and
/// are never reused within a registry.
pub struct HandleRegistry {
    entries: Mutex<HashMap<i64, Entry>>,
    next_handle: AtomicI64,
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
        }
    }

    /// Register `object` and return its fresh handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the table mutex is poisoned.
    pub fn create<T: NativeObject>(&self, object: Arc<T>) -> Result<Handle, BridgeError> {
        self.insert(object, false)
    }

    /// Register `object` under a handle that ignores `release`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table mutex is poisoned.
    pub fn create_pinned<T: NativeObject>(&self, object: Arc<T>) -> Result<Handle, BridgeError> {
        self.insert(object, true)
    }

    fn insert<T: NativeObject>(&self, object: Arc<T>, pinned: bool) -> Result<Handle, BridgeError> {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut entries = lock_entries(&self.entries)?;
        entries.insert(
            raw,
            Entry {
                kind: T::KIND,
                object,
                pinned,
            },
        );
        tracing::trace!(handle = raw, kind = %T::KIND, pinned, "handle created");
        Ok(Handle::from_raw(raw))
    }

    /// Look up `handle` as a `T`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or released handle and
    /// `InvalidArgument` when the handle names a different kind.
    pub fn retrieve<T: NativeObject>(&self, handle: Handle) -> Result<Arc<T>, BridgeError> {
        let entries = lock_entries(&self.entries)?;
        let entry = entries
            .get(&handle.as_raw())
            .ok_or_else(|| not_found(T::KIND, handle))?;
        check_kind::<T>(entry, handle)?;
        Arc::clone(&entry.object).downcast::<T>().map_err(|_| {
            BridgeError::invalid_argument(
                "HANDLE_KIND_MISMATCH",
                format!("handle {handle} does not hold a {}", T::KIND),
            )
        })
    }

    /// Drop the registry's share of `handle`.
    ///
    /// Returns `true` if an entry was removed. Unknown, already-released, and
    /// pinned handles are a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the handle names a different kind; the
    /// entry stays registered.
    pub fn release<T: NativeObject>(&self, handle: Handle) -> Result<bool, BridgeError> {
        let removed = {
            let mut entries = lock_entries(&self.entries)?;
            match entries.get(&handle.as_raw()) {
                None => return Ok(false),
                Some(entry) => {
                    check_kind::<T>(entry, handle)?;
                    if entry.pinned {
                        return Ok(false);
                    }
                }
            }
            entries.remove(&handle.as_raw())
        };
        // Dropped outside the lock: destructors may call back into the host.
        drop(removed);
        tracing::trace!(handle = handle.as_raw(), kind = %T::KIND, "handle released");
        Ok(true)
    }

    /// Number of live handles, pinned ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the table mutex is poisoned.
    pub fn live_count(&self) -> Result<usize, BridgeError> {
        Ok(lock_entries(&self.entries)?.len())
    }

    /// Drop every entry, pinned ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the table mutex is poisoned.
    pub fn clear(&self) -> Result<usize, BridgeError> {
        let drained: Vec<Entry> = lock_entries(&self.entries)?.drain().map(|(_, e)| e).collect();
        let n = drained.len();
        drop(drained);
        Ok(n)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.get_mut() {
            let unpinned = entries.values().filter(|e| !e.pinned).count();
            if unpinned > 0 {
                tracing::debug!(count = unpinned, "HandleRegistry dropped with live handles");
            }
        }
    }
}

fn check_kind<T: NativeObject>(entry: &Entry, handle: Handle) -> Result<(), BridgeError> {
    if entry.kind == T::KIND {
        return Ok(());
    }
    Err(BridgeError::invalid_argument(
        "HANDLE_KIND_MISMATCH",
        format!(
            "handle {handle} refers to a {}, expected a {}",
            entry.kind,
            T::KIND
        ),
    )
    .with_details(json!({
        "handle": handle.as_raw(),
        "expected": T::KIND,
        "actual": entry.kind,
    })))
}

fn not_found(kind: HandleKind, handle: Handle) -> BridgeError {
    BridgeError::not_found(
        "HANDLE_NOT_FOUND",
        format!("{kind} handle {handle} not found. It may not exist or has been released"),
    )
    .with_details(json!({ "handle": handle.as_raw(), "expected": kind }))
}

fn lock_entries(
    mutex: &Mutex<HashMap<i64, Entry>>,
) -> Result<MutexGuard<'_, HashMap<i64, Entry>>, BridgeError> {
    mutex
        .lock()
        .map_err(|_| BridgeError::engine("MUTEX_POISONED", "handle registry mutex poisoned"))
}
