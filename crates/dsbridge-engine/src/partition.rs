//! Hive-style directory partitioning (`col=value/col2=value2`).

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{EngineError, Result};

/// Directory segment used for null partition values.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Everything outside the URI unreserved set is escaped in directory values.
const PARTITION_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Rows of one batch that share a partition directory.
#[derive(Debug)]
pub struct PartitionedBatch {
    /// Relative directory, empty when the partitioning has no fields.
    pub directory: String,
    /// Rows with the partition columns removed.
    pub batch: RecordBatch,
}

/// Partitions rows by the values of a set of columns.
#[derive(Debug, Clone)]
pub struct HivePartitioning {
    schema: SchemaRef,
}

impl HivePartitioning {
    #[must_use]
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// Partition on `names`, taking field types from `dataset_schema`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for a name not in `dataset_schema`.
    pub fn from_column_names<S: AsRef<str>>(dataset_schema: &Schema, names: &[S]) -> Result<Self> {
        let fields = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                dataset_schema.field_with_name(name).cloned().map_err(|_| {
                    EngineError::invalid(format!(
                        "partition column '{name}' not found in dataset schema"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(Arc::new(Schema::new(fields))))
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schema.fields().is_empty()
    }

    /// `schema` without the partition columns.
    #[must_use]
    pub fn data_schema(&self, schema: &Schema) -> SchemaRef {
        let fields: Vec<_> = schema
            .fields()
            .iter()
            .filter(|f| self.schema.field_with_name(f.name()).is_err())
            .cloned()
            .collect();
        Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
    }

    /// Split `batch` into per-directory groups in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns an error if a partition column is missing from `batch`.
    pub fn partition(&self, batch: &RecordBatch) -> Result<Vec<PartitionedBatch>> {
        let source = batch.schema();
        let key_columns = self
            .schema
            .fields()
            .iter()
            .map(|f| {
                let i = source.index_of(f.name()).map_err(|_| {
                    EngineError::invalid(format!(
                        "partition column '{}' missing from batch",
                        f.name()
                    ))
                })?;
                Ok((f.name().as_str(), batch.column(i).clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let data_indices: Vec<usize> = source
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| self.schema.field_with_name(f.name()).is_err())
            .map(|(i, _)| i)
            .collect();
        let data = batch.project(&data_indices)?;

        if key_columns.is_empty() {
            return Ok(vec![PartitionedBatch {
                directory: String::new(),
                batch: data,
            }]);
        }

        let mut order: Vec<(String, Vec<u32>)> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        for row in 0..batch.num_rows() {
            let mut dir = String::new();
            for (name, column) in &key_columns {
                if !dir.is_empty() {
                    dir.push('/');
                }
                dir.push_str(name);
                dir.push('=');
                if column.is_null(row) {
                    dir.push_str(HIVE_DEFAULT_PARTITION);
                } else {
                    let value = array_value_to_string(column, row)?;
                    dir.extend(utf8_percent_encode(&value, PARTITION_VALUE));
                }
            }
            let row = u32::try_from(row)
                .map_err(|_| EngineError::invalid("batch too large to partition"))?;
            match lookup.get(&dir) {
                Some(&slot) => order[slot].1.push(row),
                None => {
                    lookup.insert(dir.clone(), order.len());
                    order.push((dir, vec![row]));
                }
            }
        }

        order
            .into_iter()
            .map(|(directory, rows)| {
                let batch = if rows.len() == data.num_rows() {
                    data.clone()
                } else {
                    take_record_batch(&data, &UInt32Array::from(rows))?
                };
                Ok(PartitionedBatch { directory, batch })
            })
            .collect()
    }
}
