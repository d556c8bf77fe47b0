//! Drives the `dsb_*` C ABI with `extern "C"` callbacks, the way a foreign
//! host would.

use std::ffi::{c_void, CStr, CString};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::array::{Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ffi::FFI_ArrowArray;
use arrow::record_batch::RecordBatch;
use dsbridge_engine::ipc;
use dsbridge_runtime::exchange::export_batch;
use dsbridge_runtime::ffi::*;
use parquet::arrow::ArrowWriter;

// The bridge is process-wide; tests in this binary take turns.
static SERIAL: Mutex<()> = Mutex::new(());

struct Session(#[allow(dead_code)] MutexGuard<'static, ()>);

impl Session {
    fn start(runtime: *const DsbHostRuntime) -> Self {
        let guard = SERIAL.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("DSBRIDGE_LOG", "warn");
        assert_eq!(unsafe { dsb_init(runtime, std::ptr::null()) }, DSB_OK, "{}", last_error());
        Self(guard)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        assert_eq!(dsb_shutdown(), DSB_OK);
    }
}

fn last_error() -> String {
    let ptr = dsb_last_error();
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn ok(rc: i32) {
    assert_eq!(rc, DSB_OK, "{}", last_error());
}

fn ids_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]))
}

fn write_ids(path: &Path, rows: i64) {
    let batch = RecordBatch::try_new(ids_schema(), vec![Arc::new(Int64Array::from_iter_values(0..rows))]).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), ids_schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// factory -> schema buffer -> dataset, as a host would do it.
fn open_dataset(uri: &str) -> i64 {
    let uri = CString::new(uri).unwrap();
    let mut factory = 0;
    ok(unsafe { dsb_make_file_system_dataset_factory(uri.as_ptr(), 0, 0, -1, &mut factory) });

    let mut schema = DsbBuffer {
        data: std::ptr::null(),
        len: 0,
        handle: 0,
    };
    ok(unsafe { dsb_inspect_schema(factory, &mut schema) });
    let mut dataset = 0;
    ok(unsafe { dsb_create_dataset(factory, schema.data, schema.len, &mut dataset) });
    ok(dsb_release_buffer(schema.handle));
    ok(dsb_close_dataset_factory(factory));
    dataset
}

fn drain(scanner: i64) -> Vec<usize> {
    let mut lengths = Vec::new();
    loop {
        let mut array = FFI_ArrowArray::empty();
        let mut written = -1;
        ok(unsafe { dsb_next_record_batch(scanner, &mut array, &mut written) });
        if written == 0 {
            break;
        }
        assert_eq!(written, 1);
        assert_eq!(array.child(0).offset(), 0);
        lengths.push(array.len());
    }
    lengths
}

#[test]
fn scan_through_c_abi() {
    let dir = tempfile::tempdir().unwrap();
    write_ids(&dir.path().join("ids.parquet"), 100);
    let _session = Session::start(std::ptr::null());

    let dataset = open_dataset(&dir.path().display().to_string());
    let mut pool = 0;
    ok(unsafe { dsb_default_memory_pool(&mut pool) });

    let column = CString::new("id").unwrap();
    let columns = [column.as_ptr()];
    let mut scanner = 0;
    ok(unsafe { dsb_create_scanner(dataset, columns.as_ptr(), 1, 40, pool, &mut scanner) });

    let mut schema = DsbBuffer {
        data: std::ptr::null(),
        len: 0,
        handle: 0,
    };
    ok(unsafe { dsb_get_schema_from_scanner(scanner, &mut schema) });
    let bytes = unsafe { std::slice::from_raw_parts(schema.data, schema.len) };
    assert_eq!(ipc::deserialize_schema(bytes).unwrap().fields(), ids_schema().fields());
    ok(dsb_release_buffer(schema.handle));
    ok(dsb_release_buffer(schema.handle));

    assert_eq!(drain(scanner), vec![40, 40, 20]);
    ok(dsb_close_scanner(scanner));
    ok(dsb_close_dataset(dataset));
    ok(dsb_release_memory_pool(pool));
}

#[test]
fn failures_set_last_error() {
    let _session = Session::start(std::ptr::null());

    let uri = CString::new("/definitely/not/here").unwrap();
    let mut factory = 0;
    let rc = unsafe { dsb_make_file_system_dataset_factory(uri.as_ptr(), 9, 0, -1, &mut factory) };
    assert_eq!(rc, DSB_ERROR);
    assert_eq!(last_error(), "illegal file format id: 9");
    assert_eq!(dsb_last_error_kind(), DSB_KIND_INVALID_ARGUMENT);
    assert_eq!(factory, 0);

    let mut bytes = 0;
    assert_eq!(unsafe { dsb_bytes_allocated(12_345, &mut bytes) }, DSB_ERROR);
    assert_eq!(
        last_error(),
        "Memory pool instance not found. It may not exist nor has been closed"
    );
    assert_eq!(dsb_last_error_kind(), DSB_KIND_NOT_FOUND);

    // A successful call clears the previous error.
    ok(dsb_close_scanner(12_345));
    assert!(dsb_last_error().is_null());
    assert_eq!(dsb_last_error_kind(), DSB_KIND_NONE);

    assert_eq!(unsafe { dsb_default_memory_pool(std::ptr::null_mut()) }, DSB_ERROR);
    assert_eq!(last_error(), "out must not be null");
}

#[test]
fn calls_before_init_fail() {
    let _guard = SERIAL.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut pool = 0;
    assert_eq!(unsafe { dsb_default_memory_pool(&mut pool) }, DSB_ERROR);
    assert!(last_error().contains("not initialized"));
    ok(dsb_shutdown());
}

struct ListenerState {
    limit: i64,
    reserves: AtomicUsize,
    unreserves: AtomicUsize,
    released: AtomicBool,
}

unsafe extern "C" fn reserve(ctx: *mut c_void, size: i64) -> i32 {
    let state = unsafe { &*(ctx as *const ListenerState) };
    state.reserves.fetch_add(1, Ordering::SeqCst);
    if size > state.limit {
        let message = CString::new(format!("cannot reserve {size} bytes")).unwrap();
        unsafe { dsb_raise_host_error(message.as_ptr()) };
        return 1;
    }
    DSB_OK
}

unsafe extern "C" fn unreserve(ctx: *mut c_void, _size: i64) -> i32 {
    let state = unsafe { &*(ctx as *const ListenerState) };
    state.unreserves.fetch_add(1, Ordering::SeqCst);
    DSB_OK
}

unsafe extern "C" fn release_listener(ctx: *mut c_void) {
    let state = unsafe { &*(ctx as *const ListenerState) };
    state.released.store(true, Ordering::SeqCst);
}

#[test]
fn listener_veto_surfaces_host_message() {
    let dir = tempfile::tempdir().unwrap();
    write_ids(&dir.path().join("ids.parquet"), 1000);
    // Declared before the session so it outlives the pool on shutdown.
    let state = ListenerState {
        limit: 1000,
        reserves: AtomicUsize::new(0),
        unreserves: AtomicUsize::new(0),
        released: AtomicBool::new(false),
    };
    let _session = Session::start(std::ptr::null());
    let listener = DsbReservationListener {
        ctx: std::ptr::addr_of!(state).cast_mut().cast(),
        reserve,
        unreserve,
        release: Some(release_listener),
    };
    let mut pool = 0;
    ok(unsafe { dsb_create_listenable_memory_pool(&listener, &mut pool) });

    let dataset = open_dataset(&format!("file://{}", dir.path().display()));
    let mut scanner = 0;
    ok(unsafe { dsb_create_scanner(dataset, std::ptr::null(), -1, 0, pool, &mut scanner) });

    let mut array = FFI_ArrowArray::empty();
    let mut written = -1;
    let rc = unsafe { dsb_next_record_batch(scanner, &mut array, &mut written) };
    assert_eq!(rc, DSB_ERROR);
    assert!(last_error().starts_with("cannot reserve "), "{}", last_error());
    assert_eq!(dsb_last_error_kind(), DSB_KIND_HOST_CALLBACK_FAILURE);
    assert_eq!(written, -1);
    assert!(array.is_released());

    let mut bytes = -1;
    ok(unsafe { dsb_bytes_allocated(pool, &mut bytes) });
    assert_eq!(bytes, 0);
    assert_eq!(state.reserves.load(Ordering::SeqCst), 1);
    assert_eq!(state.unreserves.load(Ordering::SeqCst), 0);

    ok(dsb_close_scanner(scanner));
    ok(dsb_release_memory_pool(pool));
    assert!(state.released.load(Ordering::SeqCst));
}

struct HostIterator {
    batches: std::vec::IntoIter<RecordBatch>,
    slot: FFI_ArrowArray,
    fail_after: Option<usize>,
    pulled: usize,
    released: AtomicBool,
}

impl HostIterator {
    fn new(batches: Vec<RecordBatch>) -> Self {
        Self {
            batches: batches.into_iter(),
            slot: FFI_ArrowArray::empty(),
            fail_after: None,
            pulled: 0,
            released: AtomicBool::new(false),
        }
    }
}

unsafe extern "C" fn has_next(ctx: *mut c_void, out: *mut i32) -> i32 {
    let iter = unsafe { &mut *(ctx as *mut HostIterator) };
    if iter.fail_after == Some(iter.pulled) {
        let message = CString::new("source connection lost").unwrap();
        unsafe { dsb_raise_host_error(message.as_ptr()) };
        return 1;
    }
    unsafe { *out = i32::from(!iter.batches.as_slice().is_empty()) };
    DSB_OK
}

unsafe extern "C" fn next(ctx: *mut c_void, out: *mut *mut FFI_ArrowArray) -> i32 {
    let iter = unsafe { &mut *(ctx as *mut HostIterator) };
    let Some(batch) = iter.batches.next() else {
        return 1;
    };
    iter.pulled += 1;
    iter.slot = export_batch(&batch);
    unsafe { *out = std::ptr::addr_of_mut!(iter.slot) };
    DSB_OK
}

unsafe extern "C" fn release_iterator(ctx: *mut c_void) {
    let iter = unsafe { &*(ctx as *const HostIterator) };
    iter.released.store(true, Ordering::SeqCst);
}

fn year_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("year", DataType::Int32, false),
        Field::new("n", DataType::Int64, false),
    ]))
}

fn year_batch(year: i32, n: i64) -> RecordBatch {
    RecordBatch::try_new(
        year_schema(),
        vec![
            Arc::new(Int32Array::from(vec![year])),
            Arc::new(Int64Array::from(vec![n])),
        ],
    )
    .unwrap()
}

fn write_years(host: &mut HostIterator, out: &Path, max_partitions: i64) -> i32 {
    let vtable = DsbBatchIterator {
        ctx: std::ptr::addr_of_mut!(*host).cast(),
        has_next,
        next,
        release: Some(release_iterator),
    };
    let schema = ipc::serialize_schema(&year_schema()).unwrap();
    let uri = CString::new(out.display().to_string()).unwrap();
    let year = CString::new("year").unwrap();
    let partition_columns = [year.as_ptr()];
    let template = CString::new("").unwrap();
    unsafe {
        dsb_write_from_iterator_to_file(
            &vtable,
            schema.as_ptr(),
            schema.len(),
            0,
            uri.as_ptr(),
            partition_columns.as_ptr(),
            1,
            max_partitions,
            template.as_ptr(),
        )
    }
}

#[test]
fn write_through_c_abi() {
    let dir = tempfile::tempdir().unwrap();
    let _session = Session::start(std::ptr::null());

    let out = dir.path().join("ok");
    let mut host = HostIterator::new(vec![year_batch(2020, 1), year_batch(2021, 2), year_batch(2021, 3)]);
    ok(write_years(&mut host, &out, 2));
    assert!(host.released.load(Ordering::SeqCst));
    assert!(out.join("year=2020/part-0.parquet").is_file());
    assert!(out.join("year=2021/part-0.parquet").is_file());

    let mut host = HostIterator::new(vec![year_batch(2020, 1), year_batch(2021, 2), year_batch(2021, 3)]);
    assert_eq!(write_years(&mut host, &dir.path().join("limited"), 1), DSB_ERROR);
    assert_eq!(dsb_last_error_kind(), DSB_KIND_ENGINE_FAILURE);
    assert!(last_error().contains("exceeds the maximum of 1"));
    assert!(host.released.load(Ordering::SeqCst));

    let mut host = HostIterator::new(vec![year_batch(2020, 1), year_batch(2021, 2)]);
    host.fail_after = Some(1);
    assert_eq!(write_years(&mut host, &dir.path().join("failing"), 0), DSB_ERROR);
    assert_eq!(dsb_last_error_kind(), DSB_KIND_HOST_CALLBACK_FAILURE);
    assert_eq!(last_error(), "source connection lost");
    assert!(host.released.load(Ordering::SeqCst));
}

struct RuntimeState {
    attached: AtomicBool,
    attaches: AtomicI64,
    detaches: AtomicI64,
}

unsafe extern "C" fn is_attached(ctx: *mut c_void) -> i32 {
    let state = unsafe { &*(ctx as *const RuntimeState) };
    i32::from(state.attached.load(Ordering::SeqCst))
}

unsafe extern "C" fn attach(ctx: *mut c_void) -> i32 {
    let state = unsafe { &*(ctx as *const RuntimeState) };
    state.attached.store(true, Ordering::SeqCst);
    state.attaches.fetch_add(1, Ordering::SeqCst);
    DSB_OK
}

unsafe extern "C" fn detach(ctx: *mut c_void) {
    let state = unsafe { &*(ctx as *const RuntimeState) };
    state.attached.store(false, Ordering::SeqCst);
    state.detaches.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn host_callbacks_attach_unattached_threads() {
    let dir = tempfile::tempdir().unwrap();
    let state: &'static RuntimeState = Box::leak(Box::new(RuntimeState {
        attached: AtomicBool::new(false),
        attaches: AtomicI64::new(0),
        detaches: AtomicI64::new(0),
    }));
    let runtime = DsbHostRuntime {
        ctx: std::ptr::addr_of!(*state).cast_mut().cast(),
        is_attached,
        attach,
        detach,
    };
    let _session = Session::start(&runtime);

    let mut host = HostIterator::new(vec![year_batch(2020, 1)]);
    ok(write_years(&mut host, &dir.path().join("out"), 0));
    let attaches = state.attaches.load(Ordering::SeqCst);
    assert!(attaches > 0);
    assert_eq!(attaches, state.detaches.load(Ordering::SeqCst));
    assert!(!state.attached.load(Ordering::SeqCst));
}
