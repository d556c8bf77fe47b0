//! Schema exchange in Arrow IPC stream format.
//!
//! Schemas cross the host boundary as an IPC stream holding only the schema
//! message, so any Arrow implementation on the host side can read them.

use std::io::Cursor;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;

use crate::error::{EngineError, Result};

/// Encode `schema` into IPC stream bytes.
///
/// # Errors
///
/// Returns an error if the IPC writer rejects the schema.
pub fn serialize_schema(schema: &Schema) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = StreamWriter::try_new(&mut buf, schema)?;
    writer.finish()?;
    drop(writer);
    Ok(buf)
}

/// Decode a schema from IPC stream bytes. Trailing record batches are ignored.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] if `bytes` is not an IPC stream.
pub fn deserialize_schema(bytes: &[u8]) -> Result<SchemaRef> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| EngineError::invalid(format!("invalid serialized schema: {e}")))?;
    Ok(reader.schema())
}
