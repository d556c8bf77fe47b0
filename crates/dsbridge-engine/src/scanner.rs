//! Pull-based scanner over a [`Dataset`].
//!
//! A [`Scanner`] binds a dataset to a projection, a batch-size hint and a
//! memory pool. [`Scanner::scan_batches`] walks fragments in order and
//! yields [`TaggedRecordBatch`]es that:
//!
//! - match the projected schema (columns looked up by name, missing columns
//!   filled with nulls, differing types cast),
//! - are charged to the scanner's pool for as long as they are alive,
//! - hold at most `batch_size` rows. Larger source batches are sliced, so
//!   yielded columns may carry a non-zero offset.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef};
use arrow::compute::cast;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::format::BatchIter;
use crate::fragment::FragmentRef;
use crate::pool::{charge_batch, default_memory_pool, MemoryPool};

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 131_072;

/// Everything a fragment needs to know to produce batches.
#[derive(Clone)]
pub struct ScanOptions {
    pub dataset_schema: SchemaRef,
    pub projected_schema: SchemaRef,
    pub batch_size: usize,
    pub pool: Arc<dyn MemoryPool>,
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("projected_columns", &self.projected_schema.fields().len())
            .field("batch_size", &self.batch_size)
            .field("pool", &self.pool.backend_name())
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Dataset::new_scan`].
pub struct ScannerBuilder {
    dataset: Arc<Dataset>,
    projected_schema: SchemaRef,
    batch_size: usize,
    pool: Arc<dyn MemoryPool>,
}

impl ScannerBuilder {
    #[must_use]
    pub fn new(dataset: Arc<Dataset>) -> Self {
        let projected_schema = dataset.schema().clone();
        Self {
            dataset,
            projected_schema,
            batch_size: DEFAULT_BATCH_SIZE,
            pool: default_memory_pool(),
        }
    }

    /// Restrict output to `columns`, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] if a column is not in the dataset schema.
    pub fn project<S: AsRef<str>>(mut self, columns: &[S]) -> Result<Self> {
        let schema = self.dataset.schema();
        let mut fields = Vec::with_capacity(columns.len());
        for name in columns {
            let name = name.as_ref();
            let field = schema.field_with_name(name).map_err(|_| {
                EngineError::invalid(format!("No match for field '{name}' in dataset schema"))
            })?;
            fields.push(field.clone());
        }
        self.projected_schema = Arc::new(Schema::new_with_metadata(
            fields,
            schema.metadata().clone(),
        ));
        Ok(self)
    }

    /// Maximum rows per yielded batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for zero.
    pub fn batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EngineError::invalid("batch size must be positive"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    #[must_use]
    pub fn pool(mut self, pool: Arc<dyn MemoryPool>) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn finish(self) -> Scanner {
        Scanner {
            options: ScanOptions {
                dataset_schema: self.dataset.schema().clone(),
                projected_schema: self.projected_schema,
                batch_size: self.batch_size,
                pool: self.pool,
            },
            dataset: self.dataset,
        }
    }
}

/// Configured scan over a dataset.
#[derive(Debug)]
pub struct Scanner {
    dataset: Arc<Dataset>,
    options: ScanOptions,
}

impl Scanner {
    #[must_use]
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Start a pass over every fragment.
    ///
    /// Fragments are opened lazily as the iterator advances.
    #[must_use]
    pub fn scan_batches(&self) -> TaggedRecordBatchIterator {
        let fragments = self.dataset.fragments().to_vec();
        tracing::debug!(
            fragments = fragments.len(),
            columns = self.options.projected_schema.fields().len(),
            batch_size = self.options.batch_size,
            pool = self.options.pool.backend_name(),
            "scan started"
        );
        TaggedRecordBatchIterator {
            fragments: fragments.into_iter(),
            current: None,
            pending: VecDeque::new(),
            options: self.options.clone(),
            done: false,
        }
    }
}

/// A batch plus the fragment it came from.
#[derive(Debug, Clone)]
pub struct TaggedRecordBatch {
    pub record_batch: RecordBatch,
    pub fragment: FragmentRef,
}

/// Iterator returned by [`Scanner::scan_batches`]. Fused after the first
/// error.
pub struct TaggedRecordBatchIterator {
    fragments: std::vec::IntoIter<FragmentRef>,
    current: Option<(FragmentRef, BatchIter)>,
    pending: VecDeque<TaggedRecordBatch>,
    options: ScanOptions,
    done: bool,
}

impl TaggedRecordBatchIterator {
    fn fail(&mut self, err: EngineError) -> Option<Result<TaggedRecordBatch>> {
        self.done = true;
        self.current = None;
        self.pending.clear();
        Some(Err(err))
    }
}

impl Iterator for TaggedRecordBatchIterator {
    type Item = Result<TaggedRecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(tagged) = self.pending.pop_front() {
                return Some(Ok(tagged));
            }
            let Some((fragment, source)) = self.current.as_mut() else {
                let Some(fragment) = self.fragments.next() else {
                    self.done = true;
                    return None;
                };
                match fragment.scan_batches(&self.options) {
                    Ok(source) => self.current = Some((fragment, source)),
                    Err(e) => return self.fail(e),
                }
                continue;
            };
            let fragment = fragment.clone();
            match source.next() {
                Some(Ok(batch)) => match prepare(&self.options, batch) {
                    Ok(chunks) => self.pending.extend(chunks.into_iter().map(|record_batch| {
                        TaggedRecordBatch {
                            record_batch,
                            fragment: fragment.clone(),
                        }
                    })),
                    Err(e) => return self.fail(e),
                },
                Some(Err(e)) => return self.fail(e),
                None => self.current = None,
            }
        }
    }
}

/// Conform, charge and chunk one source batch.
fn prepare(options: &ScanOptions, batch: RecordBatch) -> Result<Vec<RecordBatch>> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    let batch = conform(&options.projected_schema, &batch)?;
    let batch = charge_batch(&options.pool, batch)?;
    let rows = batch.num_rows();
    if rows <= options.batch_size {
        return Ok(vec![batch]);
    }
    let mut chunks = Vec::with_capacity(rows.div_ceil(options.batch_size));
    let mut offset = 0;
    while offset < rows {
        let len = options.batch_size.min(rows - offset);
        chunks.push(batch.slice(offset, len));
        offset += len;
    }
    Ok(chunks)
}

/// Reshape `batch` to `schema` by column name.
///
/// # Errors
///
/// Returns an error if a column cannot be cast, or a missing column is
/// declared non-nullable.
pub fn conform(schema: &SchemaRef, batch: &RecordBatch) -> Result<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    if batch.schema().fields() == schema.fields() {
        return Ok(RecordBatch::try_new_with_options(
            schema.clone(),
            batch.columns().to_vec(),
            &options,
        )?);
    }
    let source = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .map(|field| -> Result<ArrayRef> {
            match source.index_of(field.name()) {
                Ok(i) => {
                    let column = batch.column(i);
                    if column.data_type() == field.data_type() {
                        Ok(column.clone())
                    } else {
                        Ok(cast(column, field.data_type())?)
                    }
                }
                Err(_) if field.is_nullable() => {
                    Ok(new_null_array(field.data_type(), batch.num_rows()))
                }
                Err(_) => Err(EngineError::invalid(format!(
                    "non-nullable column '{}' is missing from the scanned data",
                    field.name()
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new_with_options(
        schema.clone(),
        columns,
        &options,
    )?)
}
