//! Record batch exchange over the Arrow C Data Interface.
//!
//! Batches leave the process as a struct-typed `ArrowArray` whose release
//! callback owns the buffers; the schema travels separately (see
//! [`dsbridge_engine::ipc`]). Consumers of the exported structure may assume
//! every top-level column starts at offset 0.

use std::sync::Arc;

use arrow::array::{make_array, Array, ArrayRef, MutableArrayData, StructArray};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::ffi::{from_ffi, FFI_ArrowArray, FFI_ArrowSchema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use dsbridge_engine::{charge_arrays, EngineError, MemoryPool};

/// Copy every column whose data starts at a non-zero offset so that all
/// columns start at 0. Copies are charged to `pool`; untouched columns are
/// shared with `batch`.
///
/// # Errors
///
/// Returns the pool's refusal or an Arrow error rebuilding the batch.
pub fn normalize_offsets(
    batch: &RecordBatch,
    pool: &Arc<dyn MemoryPool>,
) -> dsbridge_engine::Result<RecordBatch> {
    let sliced: Vec<usize> = (0..batch.num_columns())
        .filter(|&i| batch.column(i).to_data().offset() != 0)
        .collect();
    if sliced.is_empty() {
        return Ok(batch.clone());
    }

    let copies: Vec<ArrayRef> = sliced
        .iter()
        .map(|&i| {
            let data = batch.column(i).to_data();
            let mut copy = MutableArrayData::new(vec![&data], false, data.len());
            copy.extend(0, 0, data.len());
            make_array(copy.freeze())
        })
        .collect();
    let mut copies = charge_arrays(pool, copies)?.into_iter();
    tracing::trace!(columns = sliced.len(), "normalized sliced columns");

    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            if sliced.contains(&i) {
                copies.next().unwrap_or_else(|| Arc::clone(column))
            } else {
                Arc::clone(column)
            }
        })
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        batch.schema(),
        columns,
        &options,
    )?)
}

/// Export `batch` as a struct-typed C data array. The returned structure
/// owns references to the batch's buffers until its release callback runs.
#[must_use]
pub fn export_batch(batch: &RecordBatch) -> FFI_ArrowArray {
    let data = StructArray::from(batch.clone()).into_data();
    FFI_ArrowArray::new(&data)
}

/// Take ownership of the C data array at `ptr` and view it as a batch of
/// `schema`. The source structure is left in the released state.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for a null pointer or a top-level
/// struct with nulls, and an Arrow error if the array does not match
/// `schema`.
///
/// # Safety
///
/// `ptr` must be null or point to a valid, unreleased `ArrowArray` that is
/// not accessed concurrently.
pub unsafe fn import_batch(
    ptr: *mut FFI_ArrowArray,
    schema: &SchemaRef,
) -> dsbridge_engine::Result<RecordBatch> {
    if ptr.is_null() {
        return Err(EngineError::invalid("received a null ArrowArray address"));
    }
    // SAFETY: caller guarantees `ptr` is a valid unreleased array; from_raw
    // moves it out and marks the source released.
    let array = unsafe { FFI_ArrowArray::from_raw(ptr) };
    let ffi_schema = FFI_ArrowSchema::try_from(DataType::Struct(schema.fields().clone()))?;
    // SAFETY: the schema describes the array as agreed with the producer.
    let data = unsafe { from_ffi(array, &ffi_schema) }?;
    let imported = StructArray::from(data);
    if imported.null_count() > 0 {
        return Err(EngineError::invalid(
            "imported record batch has top-level nulls",
        ));
    }
    let options = RecordBatchOptions::new().with_row_count(Some(imported.len()));
    Ok(RecordBatch::try_new_with_options(
        Arc::clone(schema),
        imported.columns().to_vec(),
        &options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use dsbridge_engine::SystemMemoryPool;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("flag", DataType::Boolean, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from_iter_values(0..20)),
                Arc::new(BooleanArray::from(
                    (0..20).map(|i| (i % 3 != 0).then_some(i % 2 == 0)).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from_iter_values((0..20).map(|i| format!("s{i}")))),
            ],
        )
        .unwrap()
    }

    fn pool() -> Arc<dyn MemoryPool> {
        Arc::new(SystemMemoryPool::new())
    }

    #[test]
    fn sliced_columns_are_copied_to_offset_zero() {
        let full = batch();
        let sliced = full.slice(5, 7);
        assert!(sliced.columns().iter().any(|c| c.to_data().offset() != 0));

        let pool = pool();
        let normalized = normalize_offsets(&sliced, &pool).unwrap();
        for column in normalized.columns() {
            assert_eq!(column.to_data().offset(), 0);
        }
        assert_eq!(normalized, sliced);
        assert!(pool.bytes_allocated() > 0);
        drop(normalized);
        assert_eq!(pool.bytes_allocated(), 0);
    }

    #[test]
    fn unsliced_columns_pass_through() {
        let full = batch();
        let pool = pool();
        let normalized = normalize_offsets(&full, &pool).unwrap();
        assert_eq!(pool.bytes_allocated(), 0);
        for (a, b) in full.columns().iter().zip(normalized.columns()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn export_then_import_preserves_batch() {
        let original = batch();
        let mut exported = export_batch(&original);
        let imported = unsafe { import_batch(&mut exported, &original.schema()) }.unwrap();
        assert_eq!(imported, original);
        assert!(exported.is_released());
    }

    #[test]
    fn exported_offsets_are_zero() {
        let pool = pool();
        let normalized = normalize_offsets(&batch().slice(3, 4), &pool).unwrap();
        let exported = export_batch(&normalized);
        assert_eq!(exported.offset(), 0);
        assert_eq!(exported.len(), 4);
        for i in 0..exported.num_children() {
            assert_eq!(exported.child(i).offset(), 0);
        }
    }

    #[test]
    fn null_pointer_is_invalid() {
        let schema = batch().schema();
        let err = unsafe { import_batch(std::ptr::null_mut(), &schema) }.unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }
}
