//! Dataset write path: drain a scanner into partitioned files.

use std::collections::HashMap;
use std::path::PathBuf;

use arrow::datatypes::SchemaRef;

use crate::error::{EngineError, Result};
use crate::format::{FileFormat, FileWriter};
use crate::fs;
use crate::partition::HivePartitioning;
use crate::scanner::Scanner;

/// Placeholder replaced by the per-directory file counter.
pub const BASENAME_COUNTER: &str = "{i}";

/// What to do when the target directory already holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingDataBehavior {
    /// Refuse to write into a non-empty directory.
    #[default]
    Error,
    /// Write alongside existing files, overwriting any with the same name.
    OverwriteOrIgnore,
}

/// Options for [`write_dataset`].
#[derive(Debug, Clone)]
pub struct FileSystemDatasetWriteOptions {
    pub format: FileFormat,
    pub base_dir: PathBuf,
    pub basename_template: String,
    pub partitioning: HivePartitioning,
    pub max_partitions: usize,
    pub existing_data_behavior: ExistingDataBehavior,
}

/// A file produced by [`write_dataset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    pub files: Vec<WrittenFile>,
}

impl WriteSummary {
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.files.iter().map(|f| f.rows).sum()
    }
}

struct OpenFile {
    path: PathBuf,
    writer: FileWriter,
    rows: usize,
}

/// Scan every batch from `scanner` and write it under `options.base_dir`.
///
/// # Errors
///
/// Returns [`EngineError::Invalid`] for a bad basename template or a
/// non-empty target directory under [`ExistingDataBehavior::Error`], and
/// [`EngineError::PartitionLimit`] once the write would span more than
/// `max_partitions` directories. Scan and encode errors are propagated.
/// Files opened before a failure are left behind unfinished.
pub fn write_dataset(options: &FileSystemDatasetWriteOptions, scanner: &Scanner) -> Result<WriteSummary> {
    validate_basename_template(&options.basename_template)?;
    if options.max_partitions == 0 {
        return Err(EngineError::invalid("max_partitions must be positive"));
    }
    if options.existing_data_behavior == ExistingDataBehavior::Error
        && !fs::is_empty_or_missing(&options.base_dir)?
    {
        return Err(EngineError::invalid(format!(
            "Could not write to {} as the directory is not empty and existing_data_behavior is to error",
            options.base_dir.display()
        )));
    }
    std::fs::create_dir_all(&options.base_dir)?;

    let data_schema = options
        .partitioning
        .data_schema(&scanner.options().projected_schema);
    let mut open: Vec<OpenFile> = Vec::new();
    let mut by_dir: HashMap<String, usize> = HashMap::new();

    for tagged in scanner.scan_batches() {
        let tagged = tagged?;
        let groups = options.partitioning.partition(&tagged.record_batch)?;

        let new_dirs = groups
            .iter()
            .filter(|g| !by_dir.contains_key(&g.directory))
            .count();
        let total = by_dir.len() + new_dirs;
        if total > options.max_partitions {
            return Err(EngineError::PartitionLimit(format!(
                "Fragment would be written into {total} partitions. This exceeds the maximum of {}",
                options.max_partitions
            )));
        }

        for group in groups {
            let slot = match by_dir.get(&group.directory) {
                Some(&slot) => slot,
                None => {
                    let file = open_file(options, &group.directory, data_schema.clone())?;
                    open.push(file);
                    by_dir.insert(group.directory.clone(), open.len() - 1);
                    open.len() - 1
                }
            };
            let file = &mut open[slot];
            file.writer.write(&group.batch)?;
            file.rows += group.batch.num_rows();
        }
    }

    let mut summary = WriteSummary::default();
    for file in open {
        file.writer.finish()?;
        summary.files.push(WrittenFile {
            path: file.path,
            rows: file.rows,
        });
    }
    tracing::info!(
        base_dir = %options.base_dir.display(),
        files = summary.files.len(),
        rows = summary.total_rows(),
        "dataset written"
    );
    Ok(summary)
}

/// # Errors
///
/// Returns [`EngineError::Invalid`] unless `template` contains `{i}`.
pub fn validate_basename_template(template: &str) -> Result<()> {
    if template.contains(BASENAME_COUNTER) {
        Ok(())
    } else {
        Err(EngineError::invalid(format!(
            "basename_template did not contain '{BASENAME_COUNTER}': {template}"
        )))
    }
}

fn open_file(options: &FileSystemDatasetWriteOptions, directory: &str, schema: SchemaRef) -> Result<OpenFile> {
    let dir: PathBuf = if directory.is_empty() {
        options.base_dir.clone()
    } else {
        options.base_dir.join(directory)
    };
    std::fs::create_dir_all(&dir)?;
    // One file per directory, so the counter is always 0 for this write.
    let path = dir.join(options.basename_template.replace(BASENAME_COUNTER, "0"));
    tracing::debug!(path = %path.display(), "opening output file");
    let writer = options.format.create_writer(&path, schema)?;
    Ok(OpenFile {
        path,
        writer,
        rows: 0,
    })
}
