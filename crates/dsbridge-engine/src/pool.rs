//! Memory pools and reservation accounting.
//!
//! Every batch the scanner produces is charged to a [`MemoryPool`]. The
//! process-wide [`SystemMemoryPool`] only counts bytes; a
//! [`ListenableMemoryPool`] additionally reports each allocation and free to
//! a [`ReservationListener`] so an external accountant can veto allocations.
//!
//! Charges are tied to buffer lifetimes by [`charge_batch`]: the returned
//! batch's buffers keep a [`MemoryReservation`] alive, so the pool is only
//! credited once the last consumer drops the data.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use arrow::array::{make_array, Array, ArrayData, ArrayRef};
use arrow::buffer::{BooleanBuffer, Buffer, NullBuffer};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_buffer::alloc::Allocation;

use crate::error::Result;

/// Allocator accounting interface.
///
/// Implementations must be internally synchronized: pools are shared by
/// concurrent scanners.
pub trait MemoryPool: Send + Sync + fmt::Debug {
    /// Account for `size` new bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the allocation is refused. Nothing is accounted
    /// in that case.
    fn allocate(&self, size: usize) -> Result<()>;

    /// Return `size` bytes previously accounted by [`MemoryPool::allocate`].
    fn free(&self, size: usize);

    /// Bytes currently allocated through this pool.
    fn bytes_allocated(&self) -> usize;

    /// High-water mark of [`MemoryPool::bytes_allocated`].
    fn max_memory(&self) -> usize;

    fn backend_name(&self) -> &'static str;
}

/// Counting pool backed by the global allocator. Never refuses.
#[derive(Debug, Default)]
pub struct SystemMemoryPool {
    bytes: AtomicUsize,
    peak: AtomicUsize,
}

impl SystemMemoryPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryPool for SystemMemoryPool {
    fn allocate(&self, size: usize) -> Result<()> {
        let now = self.bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    fn free(&self, size: usize) {
        let prev = self.bytes.fetch_sub(size, Ordering::AcqRel);
        debug_assert!(prev >= size, "pool freed more than it allocated");
    }

    fn bytes_allocated(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    fn max_memory(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    fn backend_name(&self) -> &'static str {
        "system"
    }
}

static DEFAULT_POOL: LazyLock<Arc<SystemMemoryPool>> =
    LazyLock::new(|| Arc::new(SystemMemoryPool::new()));

/// The process-wide default pool. Lives for the whole process.
#[must_use]
pub fn default_memory_pool() -> Arc<dyn MemoryPool> {
    DEFAULT_POOL.clone()
}

/// Receives reservation events from a [`ListenableMemoryPool`].
///
/// Called synchronously on the allocating thread.
pub trait ReservationListener: Send + Sync {
    /// Called before `size` bytes are allocated.
    ///
    /// # Errors
    ///
    /// An error vetoes the allocation; the pool then reports it as an
    /// allocation failure and does not call [`ReservationListener::on_release`].
    fn on_reservation(&self, size: usize) -> Result<()>;

    /// Called after `size` bytes are freed.
    ///
    /// # Errors
    ///
    /// Errors are logged by the pool and otherwise ignored.
    fn on_release(&self, size: usize) -> Result<()>;
}

/// Pool that consults a [`ReservationListener`] before delegating to a
/// parent pool.
pub struct ListenableMemoryPool {
    parent: Arc<dyn MemoryPool>,
    listener: Box<dyn ReservationListener>,
    bytes: AtomicUsize,
    peak: AtomicUsize,
}

impl ListenableMemoryPool {
    #[must_use]
    pub fn new(parent: Arc<dyn MemoryPool>, listener: Box<dyn ReservationListener>) -> Self {
        Self {
            parent,
            listener,
            bytes: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl fmt::Debug for ListenableMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenableMemoryPool")
            .field("parent", &self.parent.backend_name())
            .field("bytes", &self.bytes_allocated())
            .finish_non_exhaustive()
    }
}

impl MemoryPool for ListenableMemoryPool {
    fn allocate(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        self.listener.on_reservation(size)?;
        if let Err(e) = self.parent.allocate(size) {
            if let Err(rollback) = self.listener.on_release(size) {
                tracing::warn!(size, error = %rollback, "reservation rollback failed");
            }
            return Err(e);
        }
        let now = self.bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(())
    }

    fn free(&self, size: usize) {
        if size == 0 {
            return;
        }
        self.parent.free(size);
        self.bytes.fetch_sub(size, Ordering::AcqRel);
        if let Err(e) = self.listener.on_release(size) {
            tracing::warn!(size, error = %e, "reservation release failed");
        }
    }

    fn bytes_allocated(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    fn max_memory(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    fn backend_name(&self) -> &'static str {
        "listenable"
    }
}

/// RAII accounting for `size` bytes in a pool. Frees on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<dyn MemoryPool>,
    size: usize,
}

impl MemoryReservation {
    /// Allocate `size` bytes from `pool`.
    ///
    /// # Errors
    ///
    /// Propagates the pool's refusal.
    pub fn try_new(pool: &Arc<dyn MemoryPool>, size: usize) -> Result<Self> {
        pool.allocate(size)?;
        Ok(Self {
            pool: Arc::clone(pool),
            size,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.pool.free(self.size);
    }
}

/// Keeps the source data and its reservation alive for as long as any
/// rebound buffer exists.
struct ChargedData {
    _source: Vec<ArrayRef>,
    _reservation: MemoryReservation,
}

type Owner = Arc<AssertUnwindSafe<ChargedData>>;

/// Charge `batch` to `pool` and return a batch whose buffers hold the charge.
///
/// # Errors
///
/// Returns the pool's refusal; `batch` is then dropped uncharged.
pub fn charge_batch(pool: &Arc<dyn MemoryPool>, batch: RecordBatch) -> Result<RecordBatch> {
    let columns = charge_arrays(pool, batch.columns().to_vec())?;
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        batch.schema(),
        columns,
        &options,
    )?)
}

/// Charge a set of arrays to `pool` as one reservation.
///
/// # Errors
///
/// Returns the pool's refusal.
pub fn charge_arrays(pool: &Arc<dyn MemoryPool>, arrays: Vec<ArrayRef>) -> Result<Vec<ArrayRef>> {
    let size: usize = arrays.iter().map(|a| a.get_array_memory_size()).sum();
    let reservation = MemoryReservation::try_new(pool, size)?;
    let rebound: Vec<ArrayRef> = {
        let owner: Owner = Arc::new(AssertUnwindSafe(ChargedData {
            _source: arrays.clone(),
            _reservation: reservation,
        }));
        arrays
            .iter()
            .map(|a| make_array(rebind(&a.to_data(), &owner)))
            .collect()
    };
    Ok(rebound)
}

fn rebind(data: &ArrayData, owner: &Owner) -> ArrayData {
    let buffers = data.buffers().iter().map(|b| rebind_buffer(b, owner)).collect();
    let children = data.child_data().iter().map(|c| rebind(c, owner)).collect();
    let nulls = data.nulls().map(|n| {
        let bits = n.inner();
        let bits = BooleanBuffer::new(rebind_buffer(bits.inner(), owner), bits.offset(), bits.len());
        // SAFETY: same bits and null count as the source buffer.
        unsafe { NullBuffer::new_unchecked(bits, n.null_count()) }
    });
    let builder = data
        .clone()
        .into_builder()
        .buffers(buffers)
        .child_data(children)
        .nulls(nulls);
    // SAFETY: layout is unchanged, only buffer ownership differs.
    unsafe { builder.build_unchecked() }
}

fn rebind_buffer(buffer: &Buffer, owner: &Owner) -> Buffer {
    let Some(ptr) = NonNull::new(buffer.as_ptr().cast_mut()) else {
        return buffer.clone();
    };
    let allocation: Arc<dyn Allocation> = owner.clone();
    // SAFETY: `owner` keeps the source buffer alive for the lifetime of the
    // returned buffer, and `ptr..ptr+len` lies inside it.
    unsafe { Buffer::from_custom_allocation(ptr, buffer.len(), allocation) }
}
