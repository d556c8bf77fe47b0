//! The boundary facade: one method per host-visible operation.
//!
//! Every method returns `Result<_, BridgeError>`; engine errors are mapped
//! on the way out and the C ABI turns them into a failure status exactly
//! once. A failed call leaves every live handle valid with unchanged
//! ownership.

use std::sync::Arc;

use arrow::ffi::FFI_ArrowArray;
use dsbridge_engine::{
    default_memory_pool, ipc, write_dataset, Dataset, ExistingDataBehavior, FileFormat,
    FileSystemDatasetFactory, FileSystemDatasetWriteOptions, HivePartitioning,
    ListenableMemoryPool, MemoryPool, WriteSummary,
};
use dsbridge_types::{BridgeError, ErrorKind, Handle, HandleKind};

use crate::config::BridgeConfig;
use crate::exchange::export_batch;
use crate::host::HostRuntime;
use crate::iterator::{make_host_dataset_scanner, HostBatchIterator};
use crate::listener::{HostReservationListener, ReserveFromHost};
use crate::logging;
use crate::registry::{HandleRegistry, NativeObject};
use crate::scanner_adaptor::DisposableScannerAdaptor;

/// Registry entry for a memory pool.
pub struct NativeMemoryPool(pub Arc<dyn MemoryPool>);

impl NativeObject for NativeMemoryPool {
    const KIND: HandleKind = HandleKind::MemoryPool;
}

impl NativeObject for FileSystemDatasetFactory {
    const KIND: HandleKind = HandleKind::DatasetFactory;
}

impl NativeObject for Dataset {
    const KIND: HandleKind = HandleKind::Dataset;
}

/// Bytes handed to the host that stay valid until their handle is released.
#[derive(Debug)]
pub struct NativeBuffer(Vec<u8>);

impl NativeBuffer {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl NativeObject for NativeBuffer {
    const KIND: HandleKind = HandleKind::Buffer;
}

/// Process-wide boundary state created by [`Bridge::init`].
pub struct Bridge {
    config: BridgeConfig,
    runtime: Arc<dyn HostRuntime>,
    registry: HandleRegistry,
    default_pool: Handle,
}

impl Bridge {
    /// Set up logging and the registry, and pin the default memory pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the default pool cannot be registered.
    pub fn init(runtime: Arc<dyn HostRuntime>, config: BridgeConfig) -> Result<Self, BridgeError> {
        if config.install_logging && !logging::init(&config) {
            tracing::debug!("tracing subscriber already installed");
        }
        let registry = HandleRegistry::new();
        let default_pool = registry.create_pinned(Arc::new(NativeMemoryPool(default_memory_pool())))?;
        tracing::info!(
            default_pool = default_pool.as_raw(),
            batch_size = config.scan.default_batch_size,
            "bridge initialized"
        );
        Ok(Self {
            config,
            runtime,
            registry,
            default_pool,
        })
    }

    /// Drop every registered object. Returns how many were live.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is poisoned.
    pub fn shutdown(&self) -> Result<usize, BridgeError> {
        let n = self.registry.clear()?;
        tracing::info!(released = n, "bridge shut down");
        Ok(n)
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    // --- memory pools ---

    /// Sentinel handle of the process-wide default pool.
    #[must_use]
    pub fn default_memory_pool(&self) -> Handle {
        self.default_pool
    }

    /// # Errors
    ///
    /// Returns an error if the registry is poisoned.
    pub fn create_listenable_memory_pool(
        &self,
        listener: Box<dyn HostReservationListener>,
    ) -> Result<Handle, BridgeError> {
        let listener = ReserveFromHost::new(Arc::clone(&self.runtime), listener);
        let pool = ListenableMemoryPool::new(default_memory_pool(), Box::new(listener));
        let handle = self
            .registry
            .create(Arc::new(NativeMemoryPool(Arc::new(pool))))?;
        tracing::debug!(handle = handle.as_raw(), "listenable memory pool created");
        Ok(handle)
    }

    /// No-op for the default pool and for unknown handles. The pool itself
    /// is destroyed once no scanner uses it any more.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `handle` is not a memory pool.
    pub fn release_memory_pool(&self, handle: Handle) -> Result<(), BridgeError> {
        self.registry.release::<NativeMemoryPool>(handle)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` if `handle` is not a live pool.
    pub fn bytes_allocated(&self, handle: Handle) -> Result<i64, BridgeError> {
        let pool = self.registry.retrieve::<NativeMemoryPool>(handle).map_err(|e| {
            if e.kind == ErrorKind::NotFound {
                BridgeError::not_found(
                    "POOL_NOT_FOUND",
                    "Memory pool instance not found. It may not exist nor has been closed",
                )
            } else {
                e
            }
        })?;
        Ok(i64::try_from(pool.0.bytes_allocated()).unwrap_or(i64::MAX))
    }

    // --- datasets ---

    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown format id or bad URI, and
    /// `EngineFailure` if the path cannot be listed.
    pub fn make_file_system_dataset_factory(
        &self,
        uri: &str,
        format_id: i64,
        start_offset: i64,
        length: i64,
    ) -> Result<Handle, BridgeError> {
        let format = FileFormat::from_id(format_id)?;
        let factory = FileSystemDatasetFactory::make(uri, format, start_offset, length)?;
        self.registry.create(Arc::new(factory))
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` if `handle` is not a dataset factory.
    pub fn close_dataset_factory(&self, handle: Handle) -> Result<(), BridgeError> {
        self.registry.release::<FileSystemDatasetFactory>(handle)?;
        Ok(())
    }

    /// Serialized schema of the factory's data.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead handle, or the engine's read failure.
    pub fn inspect_schema(&self, factory: Handle) -> Result<Vec<u8>, BridgeError> {
        let factory = self.registry.retrieve::<FileSystemDatasetFactory>(factory)?;
        let schema = factory.inspect()?;
        Ok(ipc::serialize_schema(&schema)?)
    }

    /// # Errors
    ///
    /// Returns `NotFound` for a dead factory and `InvalidArgument` for
    /// undecodable schema bytes.
    pub fn create_dataset(&self, factory: Handle, schema: &[u8]) -> Result<Handle, BridgeError> {
        let factory = self.registry.retrieve::<FileSystemDatasetFactory>(factory)?;
        let schema = ipc::deserialize_schema(schema)?;
        let dataset = factory.finish(schema);
        self.registry.create(Arc::new(dataset))
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` if `handle` is not a dataset.
    pub fn close_dataset(&self, handle: Handle) -> Result<(), BridgeError> {
        self.registry.release::<Dataset>(handle)?;
        Ok(())
    }

    // --- scanners ---

    /// Scanner over `dataset` reading `columns` (all when `None`).
    ///
    /// A `batch_size` of zero or less selects the configured default.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead dataset or pool and `InvalidArgument`
    /// for an unknown column.
    pub fn create_scanner(
        &self,
        dataset: Handle,
        columns: Option<&[String]>,
        batch_size: i64,
        pool: Handle,
    ) -> Result<Handle, BridgeError> {
        let pool = self.registry.retrieve::<NativeMemoryPool>(pool).map_err(|e| {
            if e.kind == ErrorKind::NotFound {
                BridgeError::not_found(
                    "POOL_NOT_FOUND",
                    "Memory pool does not exist or has been closed",
                )
            } else {
                e
            }
        })?;
        let dataset = self.registry.retrieve::<Dataset>(dataset)?;
        let batch_size = usize::try_from(batch_size)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(self.config.scan.default_batch_size);

        let mut builder = dataset.new_scan();
        if let Some(columns) = columns {
            builder = builder.project(columns)?;
        }
        let scanner = builder
            .batch_size(batch_size)?
            .pool(Arc::clone(&pool.0))
            .finish();
        let adaptor = DisposableScannerAdaptor::create(scanner);
        let handle = self.registry.create(Arc::new(adaptor))?;
        tracing::debug!(
            handle = handle.as_raw(),
            batch_size,
            projected = columns.map_or(-1, |c| i64::try_from(c.len()).unwrap_or(i64::MAX)),
            "scanner created"
        );
        Ok(handle)
    }

    /// Abandon iteration and drop the host's share of the scanner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `handle` is not a scanner.
    pub fn close_scanner(&self, handle: Handle) -> Result<(), BridgeError> {
        match self.registry.retrieve::<DisposableScannerAdaptor>(handle) {
            Ok(adaptor) => adaptor.close()?,
            Err(e) if e.kind == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }
        self.registry.release::<DisposableScannerAdaptor>(handle)?;
        Ok(())
    }

    /// Serialized projected schema of a scanner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead handle.
    pub fn get_schema_from_scanner(&self, handle: Handle) -> Result<Vec<u8>, BridgeError> {
        let adaptor = self.registry.retrieve::<DisposableScannerAdaptor>(handle)?;
        Ok(ipc::serialize_schema(
            &adaptor.scanner().options().projected_schema,
        )?)
    }

    /// Next batch as an exported C data array, or `None` at end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a dead or closed scanner, or the scan failure.
    pub fn next_record_batch(&self, handle: Handle) -> Result<Option<FFI_ArrowArray>, BridgeError> {
        let adaptor = self.registry.retrieve::<DisposableScannerAdaptor>(handle)?;
        Ok(adaptor.next()?.map(|batch| export_batch(&batch)))
    }

    // --- buffers ---

    /// Register `bytes` so the host can read them until `release_buffer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is poisoned.
    pub fn retain_buffer(&self, bytes: Vec<u8>) -> Result<(Handle, Arc<NativeBuffer>), BridgeError> {
        let buffer = Arc::new(NativeBuffer::new(bytes));
        let handle = self.registry.create(Arc::clone(&buffer))?;
        Ok((handle, buffer))
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` if `handle` is not a buffer.
    pub fn release_buffer(&self, handle: Handle) -> Result<(), BridgeError> {
        self.registry.release::<NativeBuffer>(handle)?;
        Ok(())
    }

    // --- write path ---

    /// Drain a host iterator into files under `uri`.
    ///
    /// `max_partitions` of zero or less and an empty `basename_template`
    /// select the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for bad schema bytes, format id, URI,
    /// partition column or template; `HostCallbackFailure` if the iterator
    /// raised; `EngineFailure` for I/O and partition-limit failures.
    #[allow(clippy::too_many_arguments)]
    pub fn write_from_iterator_to_file(
        &self,
        iter: Box<dyn HostBatchIterator>,
        schema: &[u8],
        format_id: i64,
        uri: &str,
        partition_columns: &[String],
        max_partitions: i64,
        basename_template: &str,
    ) -> Result<WriteSummary, BridgeError> {
        let schema = ipc::deserialize_schema(schema)?;
        let format = FileFormat::from_id(format_id)?;
        let base_dir = dsbridge_engine::fs::path_from_uri(uri)?;
        let partitioning = HivePartitioning::from_column_names(&schema, partition_columns)?;
        let max_partitions = usize::try_from(max_partitions)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(self.config.write.default_max_partitions);
        let basename_template = if basename_template.is_empty() {
            self.config.write.default_basename_template.clone()
        } else {
            basename_template.to_string()
        };

        let scanner = make_host_dataset_scanner(Arc::clone(&self.runtime), iter, schema);
        let options = FileSystemDatasetWriteOptions {
            format,
            base_dir,
            basename_template,
            partitioning,
            max_partitions,
            existing_data_behavior: ExistingDataBehavior::Error,
        };
        Ok(write_dataset(&options, &scanner)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NativeThreadRuntime;

    fn bridge() -> Bridge {
        let config = BridgeConfig {
            install_logging: false,
            ..BridgeConfig::default()
        };
        Bridge::init(Arc::new(NativeThreadRuntime), config).unwrap()
    }

    #[test]
    fn default_pool_is_pinned() {
        let b = bridge();
        let h = b.default_memory_pool();
        b.release_memory_pool(h).unwrap();
        assert!(b.bytes_allocated(h).is_ok());
    }

    #[test]
    fn unknown_pool_messages() {
        let b = bridge();
        let err = b.bytes_allocated(Handle::from_raw(999)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(
            err.message(),
            "Memory pool instance not found. It may not exist nor has been closed"
        );
    }

    #[test]
    fn illegal_format_id() {
        let b = bridge();
        let err = b
            .make_file_system_dataset_factory("/tmp", 7, 0, -1)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(err.message(), "illegal file format id: 7");
    }

    #[test]
    fn buffers_live_until_released() {
        let b = bridge();
        let (h, buf) = b.retain_buffer(vec![1, 2, 3]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert!(b.registry().retrieve::<NativeBuffer>(h).is_ok());
        b.release_buffer(h).unwrap();
        b.release_buffer(h).unwrap();
        assert!(b.registry().retrieve::<NativeBuffer>(h).is_err());
    }

    #[test]
    fn kind_confusion_is_rejected() {
        let b = bridge();
        let (buffer, _) = b.retain_buffer(vec![0]).unwrap();
        let err = b.close_dataset(buffer).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let err = b.close_scanner(buffer).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(b.registry().retrieve::<NativeBuffer>(buffer).is_ok());
    }

    #[test]
    fn shutdown_clears_registry() {
        let b = bridge();
        b.retain_buffer(vec![0]).unwrap();
        assert_eq!(b.shutdown().unwrap(), 2);
        assert_eq!(b.registry().live_count().unwrap(), 0);
    }
}
