//! Fragments: independently scannable pieces of a dataset.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;

use crate::error::{EngineError, Result};
use crate::format::{BatchIter, ByteRange, FileFormat};
use crate::scanner::ScanOptions;

/// A unit of data the scanner can read independently.
pub trait Fragment: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Schema as stored in the underlying source.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotImplemented`] for sources without a
    /// discoverable schema, or the source's read error.
    fn read_physical_schema(&self) -> Result<SchemaRef>;

    /// Start producing batches. Batches may not yet match
    /// `options.projected_schema`; the scanner conforms them.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened.
    fn scan_batches(&self, options: &ScanOptions) -> Result<BatchIter>;
}

/// Shared fragment pointer.
pub type FragmentRef = Arc<dyn Fragment>;

/// A single file (or a byte window of it) in a known format.
#[derive(Debug, Clone)]
pub struct FileFragment {
    path: PathBuf,
    format: FileFormat,
    range: ByteRange,
}

impl FileFragment {
    #[must_use]
    pub fn new(path: PathBuf, format: FileFormat, range: ByteRange) -> Self {
        Self {
            path,
            format,
            range,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Fragment for FileFragment {
    fn type_name(&self) -> &'static str {
        self.format.type_name()
    }

    fn read_physical_schema(&self) -> Result<SchemaRef> {
        self.format.inspect(&self.path)
    }

    fn scan_batches(&self, options: &ScanOptions) -> Result<BatchIter> {
        let columns: Vec<String> = options
            .projected_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        self.format
            .open(&self.path, Some(&columns), options.batch_size, self.range)
    }
}

/// Fragment over a forward-only batch sequence supplied by the caller.
///
/// The sequence can be consumed once; the fragment has no physical schema
/// of its own.
pub struct IteratorFragment {
    source: Mutex<Option<BatchIter>>,
}

impl IteratorFragment {
    pub const TYPE_NAME: &'static str = "simple_iterator";

    #[must_use]
    pub fn new(source: BatchIter) -> Self {
        Self {
            source: Mutex::new(Some(source)),
        }
    }
}

impl fmt::Debug for IteratorFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let consumed = self.source.lock().map_or(true, |s| s.is_none());
        f.debug_struct("IteratorFragment")
            .field("consumed", &consumed)
            .finish()
    }
}

impl Fragment for IteratorFragment {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn read_physical_schema(&self) -> Result<SchemaRef> {
        Err(EngineError::not_implemented("No physical schema is readable"))
    }

    fn scan_batches(&self, _options: &ScanOptions) -> Result<BatchIter> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| EngineError::invalid("iterator fragment mutex poisoned"))?;
        source.take().ok_or_else(|| {
            EngineError::invalid(format!(
                "fragment {} has already been scanned",
                Self::TYPE_NAME
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::default_memory_pool;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn options(schema: SchemaRef) -> ScanOptions {
        ScanOptions {
            dataset_schema: schema.clone(),
            projected_schema: schema,
            batch_size: 1024,
            pool: default_memory_pool(),
        }
    }

    #[test]
    fn iterator_fragment_scans_once() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(vec![1, 2]))]).unwrap();
        let frag = IteratorFragment::new(Box::new(vec![Ok::<_, EngineError>(batch)].into_iter()));
        assert_eq!(frag.type_name(), "simple_iterator");

        let rows: usize = frag
            .scan_batches(&options(schema.clone()))
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .sum();
        assert_eq!(rows, 2);

        let err = frag.scan_batches(&options(schema)).err().unwrap();
        assert!(err.to_string().contains("already been scanned"));
    }

    #[test]
    fn iterator_fragment_has_no_physical_schema() {
        let frag = IteratorFragment::new(Box::new(std::iter::empty()));
        let err = frag.read_physical_schema().unwrap_err();
        assert!(matches!(err, EngineError::NotImplemented(_)));
        assert_eq!(err.to_string(), "No physical schema is readable");
    }
}
