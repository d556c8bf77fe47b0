//! File formats understood by the engine.
//!
//! Formats are addressed by a small integer id at the boundary. Only Parquet
//! (`0`) is supported.

use std::fs::File;
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::file::metadata::ParquetMetaData;

use crate::error::{EngineError, Result};

/// Boxed forward-only stream of batches.
pub type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Parquet,
}

impl FileFormat {
    /// Resolve a boundary format id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for any id other than `0`.
    pub fn from_id(id: i64) -> Result<Self> {
        match id {
            0 => Ok(Self::Parquet),
            other => Err(EngineError::invalid(format!("illegal file format id: {other}"))),
        }
    }

    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Parquet => 0,
        }
    }

    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
        }
    }

    /// Read the physical schema stored in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its footer decoded.
    pub fn inspect(self, path: &Path) -> Result<SchemaRef> {
        match self {
            Self::Parquet => {
                let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
                Ok(builder.schema().clone())
            }
        }
    }

    /// Open `path` for reading.
    ///
    /// `columns` restricts decoding to the named top-level columns that exist
    /// in the file; `None` reads every column. Only row groups selected by
    /// `range` are read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded.
    pub fn open(
        self,
        path: &Path,
        columns: Option<&[String]>,
        batch_size: usize,
        range: ByteRange,
    ) -> Result<BatchIter> {
        match self {
            Self::Parquet => {
                let mut builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?
                    .with_batch_size(batch_size);
                if let Some(columns) = columns {
                    let indices: Vec<usize> = builder
                        .schema()
                        .fields()
                        .iter()
                        .enumerate()
                        .filter(|(_, f)| columns.iter().any(|c| c == f.name()))
                        .map(|(i, _)| i)
                        .collect();
                    // An empty mask loses the row count; read everything instead.
                    if !indices.is_empty() {
                        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                        builder = builder.with_projection(mask);
                    }
                }
                if !range.is_whole_file() {
                    let groups = range.select_row_groups(builder.metadata());
                    tracing::debug!(
                        path = %path.display(),
                        start = range.start,
                        length = range.length,
                        row_groups = groups.len(),
                        "byte range selected row groups"
                    );
                    builder = builder.with_row_groups(groups);
                }
                let reader = builder.build()?;
                Ok(Box::new(reader.map(|r| r.map_err(EngineError::from))))
            }
        }
    }

    /// Create a writer for a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create_writer(self, path: &Path, schema: SchemaRef) -> Result<FileWriter> {
        match self {
            Self::Parquet => {
                let file = File::create(path)?;
                let writer = ArrowWriter::try_new(file, schema, None)?;
                Ok(FileWriter::Parquet(Box::new(writer)))
            }
        }
    }
}

/// Open writer for one output file.
pub enum FileWriter {
    Parquet(Box<ArrowWriter<File>>),
}

impl FileWriter {
    /// # Errors
    ///
    /// Returns an error if encoding or I/O fails.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        match self {
            Self::Parquet(w) => Ok(w.write(batch)?),
        }
    }

    /// Flush and finalize the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer cannot be written.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Parquet(w) => {
                (*w).close()?;
                Ok(())
            }
        }
    }
}

/// Byte window of a file to read. Row groups whose first column chunk
/// starts inside the window are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    /// Negative means "to end of file".
    pub length: i64,
}

impl ByteRange {
    pub const WHOLE_FILE: ByteRange = ByteRange {
        start: 0,
        length: -1,
    };

    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] for a negative start offset.
    pub fn new(start: i64, length: i64) -> Result<Self> {
        if start < 0 {
            return Err(EngineError::invalid(format!(
                "start offset must be non-negative, got {start}"
            )));
        }
        Ok(Self { start, length })
    }

    #[must_use]
    pub fn is_whole_file(self) -> bool {
        self.start == 0 && self.length < 0
    }

    fn contains(self, offset: u64) -> bool {
        let Ok(offset) = i64::try_from(offset) else {
            return false;
        };
        offset >= self.start && (self.length < 0 || offset < self.start.saturating_add(self.length))
    }

    fn select_row_groups(self, metadata: &ParquetMetaData) -> Vec<usize> {
        metadata
            .row_groups()
            .iter()
            .enumerate()
            .filter(|(_, rg)| rg.num_columns() > 0 && self.contains(rg.column(0).byte_range().0))
            .map(|(i, _)| i)
            .collect()
    }
}

impl Default for ByteRange {
    fn default() -> Self {
        Self::WHOLE_FILE
    }
}
