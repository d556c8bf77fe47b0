//! Host runtime attach discipline.
//!
//! Callbacks into the host (reservation listeners, batch iterators) may fire
//! on any native thread. Before calling in, the thread must be attached to
//! the host runtime; threads attached only for the call are detached again
//! afterwards.

use std::sync::Arc;

use dsbridge_types::BridgeError;

/// The managed runtime that owns host callbacks.
pub trait HostRuntime: Send + Sync {
    fn is_current_thread_attached(&self) -> bool;

    /// # Errors
    ///
    /// Returns `RuntimeAttachFailure` if the runtime refuses the thread.
    fn attach_current_thread(&self) -> Result<(), BridgeError>;

    fn detach_current_thread(&self);
}

/// Runtime for hosts without a thread-attachment concept (plain C callers,
/// tests). Every thread counts as attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeThreadRuntime;

impl HostRuntime for NativeThreadRuntime {
    fn is_current_thread_attached(&self) -> bool {
        true
    }

    fn attach_current_thread(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn detach_current_thread(&self) {}
}

/// Keeps the current thread attached for its lifetime.
#[must_use = "the thread is detached when the guard drops"]
pub struct AttachGuard {
    runtime: Arc<dyn HostRuntime>,
    attached_here: bool,
}

impl AttachGuard {
    /// Whether this guard performed the attach (and will detach).
    #[must_use]
    pub fn attached_here(&self) -> bool {
        self.attached_here
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if self.attached_here {
            self.runtime.detach_current_thread();
        }
    }
}

/// Attach the current thread unless it already is.
///
/// # Errors
///
/// Returns `RuntimeAttachFailure` when attaching fails.
pub fn ensure_attached(runtime: &Arc<dyn HostRuntime>) -> Result<AttachGuard, BridgeError> {
    if runtime.is_current_thread_attached() {
        return Ok(AttachGuard {
            runtime: Arc::clone(runtime),
            attached_here: false,
        });
    }
    runtime.attach_current_thread().map_err(|e| {
        tracing::warn!(error = %e, "failed to attach native thread to host runtime");
        BridgeError::runtime_attach(
            "ATTACH_FAILED",
            format!("Host runtime was not attached to current thread: {}", e.message()),
        )
    })?;
    tracing::trace!("attached native thread to host runtime");
    Ok(AttachGuard {
        runtime: Arc::clone(runtime),
        attached_here: true,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::CountingRuntime;
    use super::*;
    use dsbridge_types::ErrorKind;
    use std::sync::atomic::Ordering;

    #[test]
    fn attaches_and_detaches_once() {
        let counting = Arc::new(CountingRuntime::default());
        let runtime: Arc<dyn HostRuntime> = counting.clone();
        std::thread::spawn(move || {
            let outer = ensure_attached(&runtime).unwrap();
            assert!(outer.attached_here());
            let inner = ensure_attached(&runtime).unwrap();
            assert!(!inner.attached_here());
            drop(inner);
            assert!(runtime.is_current_thread_attached());
            drop(outer);
            assert!(!runtime.is_current_thread_attached());
        })
        .join()
        .unwrap();
        assert_eq!(counting.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(counting.detaches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_failure_is_runtime_attach_error() {
        let runtime: Arc<dyn HostRuntime> = Arc::new(CountingRuntime {
            refuse: true,
            ..CountingRuntime::default()
        });
        let err = std::thread::spawn(move || ensure_attached(&runtime).err().unwrap())
            .join()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::RuntimeAttachFailure);
    }

    #[test]
    fn native_runtime_never_attaches() {
        let runtime: Arc<dyn HostRuntime> = Arc::new(NativeThreadRuntime);
        assert!(!ensure_attached(&runtime).unwrap().attached_here());
    }
}
