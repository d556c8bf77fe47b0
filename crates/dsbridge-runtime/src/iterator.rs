//! Host-driven batch iterators as engine fragments.
//!
//! The host supplies a forward-only `has_next` / `next` pair; `next` returns
//! the address of an `ArrowArray` the host has filled. The native side
//! imports and takes ownership of it immediately, leaving the host's struct
//! released.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::ffi::FFI_ArrowArray;
use arrow::record_batch::RecordBatch;
use dsbridge_engine::{default_memory_pool, Dataset, FragmentRef, IteratorFragment, Scanner};
use dsbridge_types::BridgeError;

use crate::exchange::import_batch;
use crate::host::{ensure_attached, HostRuntime};

/// A host-side forward-only sequence of exported batches.
pub trait HostBatchIterator: Send {
    /// # Errors
    ///
    /// Returns `HostCallbackFailure` if the host raised.
    fn has_next(&mut self) -> Result<bool, BridgeError>;

    /// Address of the next exported `ArrowArray`. Only called after
    /// `has_next` returned `true`.
    ///
    /// # Errors
    ///
    /// Returns `HostCallbackFailure` if the host raised.
    fn next_array(&mut self) -> Result<*mut FFI_ArrowArray, BridgeError>;

    /// Give up host references. Called once, on an attached thread.
    fn release(&mut self) {}
}

/// Adapts a [`HostBatchIterator`] into the engine's batch stream.
pub struct HostBatchSource {
    runtime: Arc<dyn HostRuntime>,
    iter: Box<dyn HostBatchIterator>,
    schema: SchemaRef,
    done: bool,
}

impl HostBatchSource {
    #[must_use]
    pub fn new(
        runtime: Arc<dyn HostRuntime>,
        iter: Box<dyn HostBatchIterator>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            runtime,
            iter,
            schema,
            done: false,
        }
    }

    fn pull(&mut self) -> dsbridge_engine::Result<Option<RecordBatch>> {
        let _attached = ensure_attached(&self.runtime)?;
        if !self.iter.has_next()? {
            return Ok(None);
        }
        let ptr = self.iter.next_array()?;
        // SAFETY: the host hands over a filled ArrowArray it no longer reads.
        let batch = unsafe { import_batch(ptr, &self.schema) }?;
        Ok(Some(batch))
    }
}

impl Iterator for HostBatchSource {
    type Item = dsbridge_engine::Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.pull() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for HostBatchSource {
    fn drop(&mut self) {
        match ensure_attached(&self.runtime) {
            Ok(_attached) => self.iter.release(),
            Err(e) => tracing::warn!(error = %e, "leaking host iterator: thread could not attach"),
        }
    }
}

/// Scanner over a single host iterator, charged to the default pool.
#[must_use]
pub fn make_host_dataset_scanner(
    runtime: Arc<dyn HostRuntime>,
    iter: Box<dyn HostBatchIterator>,
    schema: SchemaRef,
) -> Scanner {
    let source = HostBatchSource::new(runtime, iter, schema.clone());
    let fragment: FragmentRef = Arc::new(IteratorFragment::new(Box::new(source)));
    let dataset = Arc::new(Dataset::new(schema, vec![fragment]));
    dataset.new_scan().pool(default_memory_pool()).finish()
}


#[cfg(test)]
mod tests {
    use super::testing::VecIterator;
    use super::*;
    use crate::host::NativeThreadRuntime;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use dsbridge_engine::Fragment;
    use dsbridge_types::ErrorKind;
    use std::sync::atomic::Ordering;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("year", DataType::Int32, false)]))
    }

    fn batch(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(schema(), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn host_batches_flow_through_scanner() {
        let iter = VecIterator::new(vec![batch(vec![2020]), batch(vec![2021, 2021])]);
        let released = iter.released.clone();
        let scanner = make_host_dataset_scanner(Arc::new(NativeThreadRuntime), Box::new(iter), schema());

        let batches: Vec<RecordBatch> = scanner
            .scan_batches()
            .map(|t| t.unwrap().record_batch)
            .collect();
        assert_eq!(batches, vec![batch(vec![2020]), batch(vec![2021, 2021])]);

        drop(scanner);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn host_failure_surfaces_as_host_callback_error() {
        let mut iter = VecIterator::new(vec![batch(vec![1]), batch(vec![2])]);
        iter.fail_at = Some(1);
        let scanner = make_host_dataset_scanner(Arc::new(NativeThreadRuntime), Box::new(iter), schema());
        let mut batches = scanner.scan_batches();
        assert!(batches.next().unwrap().is_ok());
        let err = BridgeError::from(batches.next().unwrap().unwrap_err());
        assert_eq!(err.kind, ErrorKind::HostCallbackFailure);
        assert_eq!(err.message(), "iterator exploded");
        assert!(batches.next().is_none());
    }

    #[test]
    fn fragment_has_no_physical_schema() {
        let iter = VecIterator::new(vec![]);
        let scanner = make_host_dataset_scanner(Arc::new(NativeThreadRuntime), Box::new(iter), schema());
        let fragment = &scanner.dataset().fragments()[0];
        assert_eq!(fragment.type_name(), "simple_iterator");
        assert!(fragment.read_physical_schema().is_err());
    }
}
