//! Native columnar dataset engine driven by the dsbridge boundary.
//!
//! Provides memory pools with reservation listeners, file formats and
//! filesystem discovery, fragments and datasets, a pull-based scanner, and
//! a Hive-partitioned dataset writer.

#![warn(clippy::pedantic)]

pub mod dataset;
pub mod error;
pub mod format;
pub mod fragment;
pub mod fs;
pub mod ipc;
pub mod partition;
pub mod pool;
pub mod scanner;
pub mod write;

pub use dataset::{Dataset, FileSystemDatasetFactory};
pub use error::{EngineError, Result};
pub use format::{BatchIter, ByteRange, FileFormat};
pub use fragment::{FileFragment, Fragment, FragmentRef, IteratorFragment};
pub use partition::HivePartitioning;
pub use pool::{
    charge_arrays, charge_batch, default_memory_pool, ListenableMemoryPool, MemoryPool,
    MemoryReservation, ReservationListener, SystemMemoryPool,
};
pub use scanner::{ScanOptions, Scanner, ScannerBuilder, TaggedRecordBatch, TaggedRecordBatchIterator};
pub use write::{
    write_dataset, ExistingDataBehavior, FileSystemDatasetWriteOptions, WriteSummary, WrittenFile,
};
