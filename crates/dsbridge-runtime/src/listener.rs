//! Bridge from engine reservation events to a host-side accountant.

use std::sync::Arc;

use dsbridge_engine::{EngineError, ReservationListener};
use dsbridge_types::BridgeError;

use crate::host::{ensure_attached, HostRuntime};

/// Host-side memory accountant supplied when a listenable pool is created.
pub trait HostReservationListener: Send + Sync {
    /// # Errors
    ///
    /// A `HostCallbackFailure` vetoes the reservation.
    fn reserve(&self, size: i64) -> Result<(), BridgeError>;

    /// # Errors
    ///
    /// Returns `HostCallbackFailure` if the host raised.
    fn unreserve(&self, size: i64) -> Result<(), BridgeError>;

    /// Give up any host references held by this listener. Called once, on an
    /// attached thread, when the owning pool is destroyed.
    fn release(&self) {}
}

/// [`ReservationListener`] that forwards to a [`HostReservationListener`],
/// attaching the calling thread to the host runtime for each call.
pub struct ReserveFromHost {
    runtime: Arc<dyn HostRuntime>,
    listener: Box<dyn HostReservationListener>,
}

impl ReserveFromHost {
    #[must_use]
    pub fn new(runtime: Arc<dyn HostRuntime>, listener: Box<dyn HostReservationListener>) -> Self {
        Self { runtime, listener }
    }
}

impl ReservationListener for ReserveFromHost {
    fn on_reservation(&self, size: usize) -> dsbridge_engine::Result<()> {
        let size = to_host_size(size)?;
        let _attached = ensure_attached(&self.runtime)?;
        self.listener.reserve(size).map_err(|e| {
            tracing::debug!(size, error = %e, "host rejected reservation");
            EngineError::from(e)
        })
    }

    fn on_release(&self, size: usize) -> dsbridge_engine::Result<()> {
        let size = to_host_size(size)?;
        let _attached = ensure_attached(&self.runtime)?;
        Ok(self.listener.unreserve(size)?)
    }
}

impl Drop for ReserveFromHost {
    fn drop(&mut self) {
        match ensure_attached(&self.runtime) {
            Ok(_attached) => self.listener.release(),
            Err(e) => tracing::warn!(error = %e, "leaking host listener: thread could not attach"),
        }
    }
}

fn to_host_size(size: usize) -> dsbridge_engine::Result<i64> {
    i64::try_from(size).map_err(|_| EngineError::OutOfMemory(format!("allocation of {size} bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::CountingRuntime;
    use crate::host::NativeThreadRuntime;
    use dsbridge_engine::{ListenableMemoryPool, MemoryPool, SystemMemoryPool};
    use dsbridge_types::ErrorKind;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Accountant {
        limit: i64,
        used: AtomicI64,
        releases: AtomicUsize,
    }

    struct Shared(Arc<Accountant>);

    impl HostReservationListener for Shared {
        fn reserve(&self, size: i64) -> Result<(), BridgeError> {
            if size > self.0.limit {
                return Err(BridgeError::host_callback(
                    "HOST_RAISED",
                    format!("cannot reserve {size} bytes"),
                ));
            }
            self.0.used.fetch_add(size, Ordering::SeqCst);
            Ok(())
        }

        fn unreserve(&self, size: i64) -> Result<(), BridgeError> {
            self.0.used.fetch_sub(size, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) {
            self.0.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(runtime: Arc<dyn HostRuntime>, acct: &Arc<Accountant>) -> ListenableMemoryPool {
        ListenableMemoryPool::new(
            Arc::new(SystemMemoryPool::new()),
            Box::new(ReserveFromHost::new(runtime, Box::new(Shared(acct.clone())))),
        )
    }

    #[test]
    fn host_rejection_fails_allocation() {
        let acct = Arc::new(Accountant {
            limit: 1000,
            ..Accountant::default()
        });
        let pool = pool(Arc::new(NativeThreadRuntime), &acct);

        let err = pool.allocate(2000).unwrap_err();
        let err = BridgeError::from(err);
        assert_eq!(err.kind, ErrorKind::HostCallbackFailure);
        assert_eq!(err.message(), "cannot reserve 2000 bytes");
        assert_eq!(pool.bytes_allocated(), 0);
        assert_eq!(acct.used.load(Ordering::SeqCst), 0);

        pool.allocate(500).unwrap();
        assert_eq!(acct.used.load(Ordering::SeqCst), 500);
        pool.free(500);
        assert_eq!(acct.used.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_pool_releases_host_listener_once() {
        let acct = Arc::new(Accountant {
            limit: i64::MAX,
            ..Accountant::default()
        });
        drop(pool(Arc::new(NativeThreadRuntime), &acct));
        assert_eq!(acct.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_attach_unattached_threads() {
        let counting = Arc::new(CountingRuntime::default());
        let acct = Arc::new(Accountant {
            limit: i64::MAX,
            ..Accountant::default()
        });
        let pool = Arc::new(pool(counting.clone(), &acct));
        let worker = Arc::clone(&pool);
        std::thread::spawn(move || {
            worker.allocate(10).unwrap();
            worker.free(10);
        })
        .join()
        .unwrap();
        assert_eq!(counting.attaches.load(Ordering::SeqCst), 2);
        assert_eq!(counting.detaches.load(Ordering::SeqCst), 2);
    }
}
