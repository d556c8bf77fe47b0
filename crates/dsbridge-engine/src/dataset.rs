//! Datasets and the filesystem dataset factory.

use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};

use crate::error::{EngineError, Result};
use crate::format::{ByteRange, FileFormat};
use crate::fragment::{FileFragment, FragmentRef};
use crate::fs;
use crate::scanner::ScannerBuilder;

/// A schema plus the ordered fragments that provide its data.
#[derive(Debug)]
pub struct Dataset {
    schema: SchemaRef,
    fragments: Vec<FragmentRef>,
}

impl Dataset {
    #[must_use]
    pub fn new(schema: SchemaRef, fragments: Vec<FragmentRef>) -> Self {
        Self { schema, fragments }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn fragments(&self) -> &[FragmentRef] {
        &self.fragments
    }

    #[must_use]
    pub fn new_scan(self: &Arc<Self>) -> ScannerBuilder {
        ScannerBuilder::new(Arc::clone(self))
    }
}

/// Discovers files under a URI and produces [`Dataset`]s over them.
#[derive(Debug)]
pub struct FileSystemDatasetFactory {
    root: PathBuf,
    format: FileFormat,
    files: Vec<PathBuf>,
    range: ByteRange,
}

impl FileSystemDatasetFactory {
    /// Resolve `uri` and discover its files.
    ///
    /// `start_offset`/`length` select a byte window and are only valid when
    /// `uri` names a single file.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported URI, a missing path, or a byte
    /// window applied to a directory.
    pub fn make(uri: &str, format: FileFormat, start_offset: i64, length: i64) -> Result<Self> {
        let root = fs::path_from_uri(uri)?;
        let range = ByteRange::new(start_offset, length)?;
        let files = fs::discover_files(&root)?;
        if !range.is_whole_file() && !root.is_file() {
            return Err(EngineError::invalid(format!(
                "a byte range can only be applied to a single file, got directory {}",
                root.display()
            )));
        }
        tracing::debug!(
            root = %root.display(),
            format = format.type_name(),
            files = files.len(),
            "discovered dataset files"
        );
        Ok(Self {
            root,
            format,
            files,
            range,
        })
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Schema of the first discovered file, or an empty schema when the
    /// dataset has no files.
    ///
    /// # Errors
    ///
    /// Returns an error if the first file cannot be read.
    pub fn inspect(&self) -> Result<SchemaRef> {
        match self.files.first() {
            Some(first) => self.format.inspect(first),
            None => {
                tracing::warn!(root = %self.root.display(), "no files to inspect");
                Ok(Arc::new(Schema::empty()))
            }
        }
    }

    /// Build a dataset over the discovered files with `schema`.
    #[must_use]
    pub fn finish(&self, schema: SchemaRef) -> Dataset {
        let fragments = self
            .files
            .iter()
            .map(|p| Arc::new(FileFragment::new(p.clone(), self.format, self.range)) as FragmentRef)
            .collect();
        Dataset::new(schema, fragments)
    }
}
