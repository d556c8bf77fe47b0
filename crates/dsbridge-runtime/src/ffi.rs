//! C ABI over [`Bridge`].
//!
//! Every `dsb_*` function returns [`DSB_OK`] or [`DSB_ERROR`]. On error the
//! message and kind are stored per thread and can be read with
//! [`dsb_last_error`] and [`dsb_last_error_kind`] until the next call on the
//! same thread. Panics are caught and reported the same way.
//!
//! Host callbacks signal failure by returning non-zero. A callback may call
//! [`dsb_raise_host_error`] first to attach the host's message.
//!
//! ```c
//! int64_t pool, factory, dataset, scanner;
//! dsb_init(NULL, NULL);
//! dsb_default_memory_pool(&pool);
//! dsb_make_file_system_dataset_factory("file:///data/events", 0, 0, -1, &factory);
//!
//! DsbBuffer schema;
//! dsb_inspect_schema(factory, &schema);
//! dsb_create_dataset(factory, schema.data, schema.len, &dataset);
//! dsb_release_buffer(schema.handle);
//!
//! dsb_create_scanner(dataset, NULL, -1, 0, pool, &scanner);
//! struct ArrowArray array;
//! int32_t written;
//! while (dsb_next_record_batch(scanner, &array, &written) == DSB_OK && written) {
//!     /* ... */
//!     array.release(&array);
//! }
//! dsb_close_scanner(scanner);
//! ```

use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, RwLock};

use arrow::ffi::FFI_ArrowArray;
use dsbridge_types::{BridgeError, ErrorKind, Handle};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::host::{HostRuntime, NativeThreadRuntime};
use crate::iterator::HostBatchIterator;
use crate::listener::HostReservationListener;

pub const DSB_OK: i32 = 0;
pub const DSB_ERROR: i32 = -1;

/// Values returned by [`dsb_last_error_kind`].
pub const DSB_KIND_NONE: i32 = 0;
pub const DSB_KIND_INVALID_ARGUMENT: i32 = 1;
pub const DSB_KIND_NOT_FOUND: i32 = 2;
pub const DSB_KIND_ENGINE_FAILURE: i32 = 3;
pub const DSB_KIND_HOST_CALLBACK_FAILURE: i32 = 4;
pub const DSB_KIND_RUNTIME_ATTACH_FAILURE: i32 = 5;

static BRIDGE: RwLock<Option<Arc<Bridge>>> = RwLock::new(None);

thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorKind, CString)>> = const { RefCell::new(None) };
    static PENDING_HOST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Host runtime callbacks. `is_attached` returns non-zero when the current
/// thread is attached; `attach` returns [`DSB_OK`] on success.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DsbHostRuntime {
    pub ctx: *mut c_void,
    pub is_attached: unsafe extern "C" fn(ctx: *mut c_void) -> i32,
    pub attach: unsafe extern "C" fn(ctx: *mut c_void) -> i32,
    pub detach: unsafe extern "C" fn(ctx: *mut c_void),
}

/// Host memory accountant. A non-zero return from `reserve` vetoes the
/// allocation. `release` is called once when the pool is destroyed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DsbReservationListener {
    pub ctx: *mut c_void,
    pub reserve: unsafe extern "C" fn(ctx: *mut c_void, size: i64) -> i32,
    pub unreserve: unsafe extern "C" fn(ctx: *mut c_void, size: i64) -> i32,
    pub release: Option<unsafe extern "C" fn(ctx: *mut c_void)>,
}

/// Host batch source. `has_next` stores 0 or 1 in `out`; `next` stores the
/// address of a filled `ArrowArray` the native side takes over. `release`
/// is called once when the source is dropped.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DsbBatchIterator {
    pub ctx: *mut c_void,
    pub has_next: unsafe extern "C" fn(ctx: *mut c_void, out: *mut i32) -> i32,
    pub next: unsafe extern "C" fn(ctx: *mut c_void, out: *mut *mut FFI_ArrowArray) -> i32,
    pub release: Option<unsafe extern "C" fn(ctx: *mut c_void)>,
}

/// Bytes owned by the native side, valid until `dsb_release_buffer(handle)`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DsbBuffer {
    pub data: *const u8,
    pub len: usize,
    pub handle: i64,
}

struct ForeignRuntime(DsbHostRuntime);

// SAFETY: the host guarantees its runtime callbacks may be invoked from any
// native thread.
unsafe impl Send for ForeignRuntime {}
unsafe impl Sync for ForeignRuntime {}

impl HostRuntime for ForeignRuntime {
    fn is_current_thread_attached(&self) -> bool {
        // SAFETY: callback and context supplied together by the host.
        unsafe { (self.0.is_attached)(self.0.ctx) != 0 }
    }

    fn attach_current_thread(&self) -> Result<(), BridgeError> {
        // SAFETY: as above.
        let rc = unsafe { (self.0.attach)(self.0.ctx) };
        if rc == DSB_OK {
            Ok(())
        } else {
            Err(BridgeError::runtime_attach(
                "ATTACH_FAILED",
                take_host_error().unwrap_or_else(|| format!("attach returned {rc}")),
            ))
        }
    }

    fn detach_current_thread(&self) {
        // SAFETY: as above.
        unsafe { (self.0.detach)(self.0.ctx) }
    }
}

struct ForeignListener(DsbReservationListener);

// SAFETY: listener callbacks are only invoked on threads attached to the
// host runtime, which the host accepts from any thread.
unsafe impl Send for ForeignListener {}
unsafe impl Sync for ForeignListener {}

impl HostReservationListener for ForeignListener {
    fn reserve(&self, size: i64) -> Result<(), BridgeError> {
        // SAFETY: callback and context supplied together by the host.
        check_callback("reserve", unsafe { (self.0.reserve)(self.0.ctx, size) })
    }

    fn unreserve(&self, size: i64) -> Result<(), BridgeError> {
        // SAFETY: as above.
        check_callback("unreserve", unsafe { (self.0.unreserve)(self.0.ctx, size) })
    }

    fn release(&self) {
        if let Some(release) = self.0.release {
            // SAFETY: called once, from the pool's destructor.
            unsafe { release(self.0.ctx) }
        }
    }
}

struct ForeignIterator(DsbBatchIterator);

// SAFETY: the iterator is driven by one thread at a time, attached first.
unsafe impl Send for ForeignIterator {}

impl HostBatchIterator for ForeignIterator {
    fn has_next(&mut self) -> Result<bool, BridgeError> {
        let mut out = 0;
        // SAFETY: callback and context supplied together by the host.
        check_callback("has_next", unsafe { (self.0.has_next)(self.0.ctx, &mut out) })?;
        Ok(out != 0)
    }

    fn next_array(&mut self) -> Result<*mut FFI_ArrowArray, BridgeError> {
        let mut out = std::ptr::null_mut();
        // SAFETY: as above.
        check_callback("next", unsafe { (self.0.next)(self.0.ctx, &mut out) })?;
        Ok(out)
    }

    fn release(&mut self) {
        if let Some(release) = self.0.release.take() {
            // SAFETY: taken, so called at most once.
            unsafe { release(self.0.ctx) }
        }
    }
}

impl Drop for ForeignIterator {
    // Covers iterators dropped before a scan took them over, on the calling
    // host thread.
    fn drop(&mut self) {
        HostBatchIterator::release(self);
    }
}

fn check_callback(name: &str, rc: i32) -> Result<(), BridgeError> {
    if rc == DSB_OK {
        return Ok(());
    }
    let message = take_host_error().unwrap_or_else(|| format!("host {name} callback failed with {rc}"));
    Err(BridgeError::host_callback("HOST_EXCEPTION", message))
}

fn take_host_error() -> Option<String> {
    PENDING_HOST_ERROR.with(|p| p.borrow_mut().take())
}

fn set_last_error(err: &BridgeError) {
    let message = CString::new(err.message().replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = Some((err.kind, message)));
}

fn clear_errors() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    PENDING_HOST_ERROR.with(|p| *p.borrow_mut() = None);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `f`, turning its error or panic into [`DSB_ERROR`] plus a stored
/// last error.
fn boundary(op: &'static str, f: impl FnOnce() -> Result<(), BridgeError>) -> i32 {
    clear_errors();
    let err = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return DSB_OK,
        Ok(Err(err)) => err,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(op, panic = %message, "panic at boundary");
            BridgeError::engine("PANIC", message)
        }
    };
    tracing::debug!(op, kind = %err.kind, code = %err.code, error = %err.message(), "boundary call failed");
    set_last_error(&err);
    DSB_ERROR
}

fn with_bridge(op: &'static str, f: impl FnOnce(&Bridge) -> Result<(), BridgeError>) -> i32 {
    boundary(op, || {
        let bridge = current_bridge()?;
        f(&bridge)
    })
}

fn current_bridge() -> Result<Arc<Bridge>, BridgeError> {
    BRIDGE
        .read()
        .map_err(|_| BridgeError::engine("LOCK_POISONED", "bridge lock poisoned"))?
        .clone()
        .ok_or_else(|| {
            BridgeError::invalid_argument("NOT_INITIALIZED", "dsbridge is not initialized; call dsb_init first")
        })
}

fn non_null<T>(ptr: *const T, what: &str) -> Result<(), BridgeError> {
    if ptr.is_null() {
        Err(BridgeError::invalid_argument("NULL_POINTER", format!("{what} must not be null")))
    } else {
        Ok(())
    }
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, BridgeError> {
    non_null(ptr, what)?;
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::invalid_argument("INVALID_UTF8", format!("{what} is not valid UTF-8")))
}

/// # Safety
///
/// `ptr` must point to `len` NUL-terminated strings.
unsafe fn c_str_array(ptr: *const *const c_char, len: usize, what: &str) -> Result<Vec<String>, BridgeError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    non_null(ptr, what)?;
    // SAFETY: `len` readable pointers per the caller's contract.
    let items = unsafe { std::slice::from_raw_parts(ptr, len) };
    items
        .iter()
        // SAFETY: each entry is a NUL-terminated string.
        .map(|&p| unsafe { c_str(p, what) }.map(str::to_string))
        .collect()
}

/// # Safety
///
/// `ptr` must point to `len` readable bytes.
unsafe fn byte_slice<'a>(ptr: *const u8, len: usize, what: &str) -> Result<&'a [u8], BridgeError> {
    if len == 0 {
        return Ok(&[]);
    }
    non_null(ptr, what)?;
    // SAFETY: `len` readable bytes per the caller's contract.
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// # Safety
///
/// `out` must be valid for a write of `T`.
unsafe fn write_out<T>(out: *mut T, value: T) {
    // SAFETY: checked non-null by every caller; the previous value is not
    // dropped.
    unsafe { std::ptr::write(out, value) }
}

fn retain(bridge: &Bridge, bytes: Vec<u8>, out: *mut DsbBuffer) -> Result<(), BridgeError> {
    let (handle, buffer) = bridge.retain_buffer(bytes)?;
    let value = DsbBuffer {
        data: buffer.as_slice().as_ptr(),
        len: buffer.as_slice().len(),
        handle: handle.as_raw(),
    };
    // SAFETY: `out` checked non-null by the caller.
    unsafe { write_out(out, value) };
    Ok(())
}

// --- lifecycle ---

/// Create the process-wide bridge. A null `runtime` treats every thread as
/// attached; a null `config_path` loads config from the environment.
/// Calling again while initialized is a no-op.
///
/// # Safety
///
/// `runtime` must be null or point to a valid [`DsbHostRuntime`] whose
/// callbacks stay valid until `dsb_shutdown`. `config_path` must be null or
/// a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn dsb_init(runtime: *const DsbHostRuntime, config_path: *const c_char) -> i32 {
    boundary("init", || {
        let runtime: Arc<dyn HostRuntime> = if runtime.is_null() {
            Arc::new(NativeThreadRuntime)
        } else {
            // SAFETY: non-null and valid per contract.
            Arc::new(ForeignRuntime(unsafe { *runtime }))
        };
        let config = if config_path.is_null() {
            BridgeConfig::from_env()
        } else {
            // SAFETY: NUL-terminated per contract.
            BridgeConfig::from_file(Path::new(unsafe { c_str(config_path, "config_path") }?))
        }
        .map_err(|e| BridgeError::invalid_argument("INVALID_CONFIG", format!("{e:#}")))?;

        let mut slot = BRIDGE
            .write()
            .map_err(|_| BridgeError::engine("LOCK_POISONED", "bridge lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(Arc::new(Bridge::init(runtime, config)?));
        } else {
            tracing::debug!("dsb_init called while already initialized");
        }
        Ok(())
    })
}

/// Drop the bridge and every object still registered. A no-op when not
/// initialized.
#[no_mangle]
pub extern "C" fn dsb_shutdown() -> i32 {
    boundary("shutdown", || {
        let bridge = BRIDGE
            .write()
            .map_err(|_| BridgeError::engine("LOCK_POISONED", "bridge lock poisoned"))?
            .take();
        if let Some(bridge) = bridge {
            bridge.shutdown()?;
        }
        Ok(())
    })
}

// --- errors ---

/// Message of the last failed call on this thread, or null. Valid until the
/// next `dsb_*` call on this thread.
#[no_mangle]
pub extern "C" fn dsb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ref().map_or(std::ptr::null(), |(_, m)| m.as_ptr()))
}

/// One of the `DSB_KIND_*` values for the last failed call on this thread.
#[no_mangle]
pub extern "C" fn dsb_last_error_kind() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow().as_ref().map_or(DSB_KIND_NONE, |(kind, _)| match kind {
            ErrorKind::InvalidArgument => DSB_KIND_INVALID_ARGUMENT,
            ErrorKind::NotFound => DSB_KIND_NOT_FOUND,
            ErrorKind::EngineFailure => DSB_KIND_ENGINE_FAILURE,
            ErrorKind::HostCallbackFailure => DSB_KIND_HOST_CALLBACK_FAILURE,
            ErrorKind::RuntimeAttachFailure => DSB_KIND_RUNTIME_ATTACH_FAILURE,
        })
    })
}

/// Record the host's message for the callback about to return failure.
///
/// # Safety
///
/// `message` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn dsb_raise_host_error(message: *const c_char) {
    let message = if message.is_null() {
        "host raised".to_string()
    } else {
        // SAFETY: NUL-terminated per contract.
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    };
    PENDING_HOST_ERROR.with(|p| *p.borrow_mut() = Some(message));
}

// --- memory pools ---

/// # Safety
///
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_default_memory_pool(out: *mut i64) -> i32 {
    with_bridge("default_memory_pool", |bridge| {
        non_null(out, "out")?;
        // SAFETY: checked above.
        unsafe { write_out(out, bridge.default_memory_pool().as_raw()) };
        Ok(())
    })
}

/// # Safety
///
/// `listener` must point to a valid [`DsbReservationListener`] whose
/// callbacks stay valid until its `release` runs. `out` must be valid for
/// writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_create_listenable_memory_pool(
    listener: *const DsbReservationListener,
    out: *mut i64,
) -> i32 {
    with_bridge("create_listenable_memory_pool", |bridge| {
        non_null(listener, "listener")?;
        non_null(out, "out")?;
        // SAFETY: checked above.
        let listener = ForeignListener(unsafe { *listener });
        let handle = bridge.create_listenable_memory_pool(Box::new(listener))?;
        // SAFETY: checked above.
        unsafe { write_out(out, handle.as_raw()) };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn dsb_release_memory_pool(pool: i64) -> i32 {
    with_bridge("release_memory_pool", |bridge| {
        bridge.release_memory_pool(Handle::from_raw(pool))
    })
}

/// # Safety
///
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_bytes_allocated(pool: i64, out: *mut i64) -> i32 {
    with_bridge("bytes_allocated", |bridge| {
        non_null(out, "out")?;
        let bytes = bridge.bytes_allocated(Handle::from_raw(pool))?;
        // SAFETY: checked above.
        unsafe { write_out(out, bytes) };
        Ok(())
    })
}

// --- datasets ---

/// # Safety
///
/// `uri` must be a NUL-terminated string; `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_make_file_system_dataset_factory(
    uri: *const c_char,
    format_id: i64,
    start_offset: i64,
    length: i64,
    out: *mut i64,
) -> i32 {
    with_bridge("make_file_system_dataset_factory", |bridge| {
        non_null(out, "out")?;
        // SAFETY: NUL-terminated per contract.
        let uri = unsafe { c_str(uri, "uri") }?;
        let handle = bridge.make_file_system_dataset_factory(uri, format_id, start_offset, length)?;
        // SAFETY: checked above.
        unsafe { write_out(out, handle.as_raw()) };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn dsb_close_dataset_factory(factory: i64) -> i32 {
    with_bridge("close_dataset_factory", |bridge| {
        bridge.close_dataset_factory(Handle::from_raw(factory))
    })
}

/// Serialized schema, retained until `dsb_release_buffer(out.handle)`.
///
/// # Safety
///
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_inspect_schema(factory: i64, out: *mut DsbBuffer) -> i32 {
    with_bridge("inspect_schema", |bridge| {
        non_null(out, "out")?;
        let bytes = bridge.inspect_schema(Handle::from_raw(factory))?;
        retain(bridge, bytes, out)
    })
}

/// # Safety
///
/// `schema` must point to `schema_len` readable bytes; `out` must be valid
/// for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_create_dataset(
    factory: i64,
    schema: *const u8,
    schema_len: usize,
    out: *mut i64,
) -> i32 {
    with_bridge("create_dataset", |bridge| {
        non_null(out, "out")?;
        // SAFETY: readable per contract.
        let schema = unsafe { byte_slice(schema, schema_len, "schema") }?;
        let handle = bridge.create_dataset(Handle::from_raw(factory), schema)?;
        // SAFETY: checked above.
        unsafe { write_out(out, handle.as_raw()) };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn dsb_close_dataset(dataset: i64) -> i32 {
    with_bridge("close_dataset", |bridge| {
        bridge.close_dataset(Handle::from_raw(dataset))
    })
}

// --- scanners ---

/// A negative `num_columns` reads every column. A `batch_size` of zero or
/// less uses the configured default.
///
/// # Safety
///
/// When `num_columns > 0`, `columns` must point to that many NUL-terminated
/// strings. `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_create_scanner(
    dataset: i64,
    columns: *const *const c_char,
    num_columns: i64,
    batch_size: i64,
    pool: i64,
    out: *mut i64,
) -> i32 {
    with_bridge("create_scanner", |bridge| {
        non_null(out, "out")?;
        let columns = match usize::try_from(num_columns) {
            // SAFETY: `n` strings per contract.
            Ok(n) => Some(unsafe { c_str_array(columns, n, "columns") }?),
            Err(_) => None,
        };
        let handle = bridge.create_scanner(
            Handle::from_raw(dataset),
            columns.as_deref(),
            batch_size,
            Handle::from_raw(pool),
        )?;
        // SAFETY: checked above.
        unsafe { write_out(out, handle.as_raw()) };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn dsb_close_scanner(scanner: i64) -> i32 {
    with_bridge("close_scanner", |bridge| {
        bridge.close_scanner(Handle::from_raw(scanner))
    })
}

/// Serialized projected schema, retained until
/// `dsb_release_buffer(out.handle)`.
///
/// # Safety
///
/// `out` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_get_schema_from_scanner(scanner: i64, out: *mut DsbBuffer) -> i32 {
    with_bridge("get_schema_from_scanner", |bridge| {
        non_null(out, "out")?;
        let bytes = bridge.get_schema_from_scanner(Handle::from_raw(scanner))?;
        retain(bridge, bytes, out)
    })
}

/// Export the next batch into `out_array` and set `written` to 1, or set
/// `written` to 0 at end-of-stream. The caller owns the exported array and
/// must invoke its release callback.
///
/// # Safety
///
/// `out_array` must be valid for writes and must not hold a live array.
/// `written` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn dsb_next_record_batch(
    scanner: i64,
    out_array: *mut FFI_ArrowArray,
    written: *mut i32,
) -> i32 {
    with_bridge("next_record_batch", |bridge| {
        non_null(out_array, "out_array")?;
        non_null(written, "written")?;
        match bridge.next_record_batch(Handle::from_raw(scanner))? {
            Some(array) => {
                // SAFETY: checked above.
                unsafe {
                    write_out(out_array, array);
                    write_out(written, 1);
                }
            }
            // SAFETY: checked above.
            None => unsafe { write_out(written, 0) },
        }
        Ok(())
    })
}

// --- buffers ---

#[no_mangle]
pub extern "C" fn dsb_release_buffer(buffer: i64) -> i32 {
    with_bridge("release_buffer", |bridge| {
        bridge.release_buffer(Handle::from_raw(buffer))
    })
}

// --- write path ---

/// Drain `iter` into files under `uri`. The iterator's `release` runs
/// before this returns, whether or not the write succeeded.
///
/// # Safety
///
/// `iter` must point to a valid [`DsbBatchIterator`]; `schema` must point to
/// `schema_len` readable bytes; `uri` and `basename_template` must be
/// NUL-terminated strings (an empty template uses the configured default);
/// `partition_columns` must point to `num_partition_columns` NUL-terminated
/// strings.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dsb_write_from_iterator_to_file(
    iter: *const DsbBatchIterator,
    schema: *const u8,
    schema_len: usize,
    format_id: i64,
    uri: *const c_char,
    partition_columns: *const *const c_char,
    num_partition_columns: usize,
    max_partitions: i64,
    basename_template: *const c_char,
) -> i32 {
    with_bridge("write_from_iterator_to_file", |bridge| {
        non_null(iter, "iter")?;
        // SAFETY: checked above; taken over immediately so `release` runs
        // even when argument decoding fails.
        let iter = Box::new(ForeignIterator(unsafe { *iter }));
        // SAFETY: pointer contracts as documented.
        let (schema, uri, partition_columns, basename_template) = unsafe {
            (
                byte_slice(schema, schema_len, "schema")?,
                c_str(uri, "uri")?,
                c_str_array(partition_columns, num_partition_columns, "partition_columns")?,
                c_str(basename_template, "basename_template")?,
            )
        };
        let summary = bridge.write_from_iterator_to_file(
            iter,
            schema,
            format_id,
            uri,
            &partition_columns,
            max_partitions,
            basename_template,
        )?;
        tracing::debug!(files = summary.files.len(), rows = summary.total_rows(), "write finished");
        Ok(())
    })
}
