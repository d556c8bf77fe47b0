//! Host boundary for the dsbridge dataset engine.
//!
//! A managed host drives native datasets through opaque handles: it creates
//! pools, factories, datasets and scanners, pulls batches over the Arrow C
//! Data Interface, and pushes its own batches into the partitioned write
//! path. [`Bridge`] is the Rust-level surface; [`ffi`] exposes it as a C ABI.

#![warn(clippy::pedantic)]

pub mod bridge;
pub mod config;
pub mod exchange;
pub mod ffi;
pub mod host;
pub mod iterator;
pub mod listener;
pub mod logging;
pub mod registry;
pub mod scanner_adaptor;

pub use bridge::{Bridge, NativeBuffer, NativeMemoryPool};
pub use config::BridgeConfig;
pub use host::{ensure_attached, AttachGuard, HostRuntime, NativeThreadRuntime};
pub use iterator::{make_host_dataset_scanner, HostBatchIterator, HostBatchSource};
pub use listener::{HostReservationListener, ReserveFromHost};
pub use registry::{HandleRegistry, NativeObject};
pub use scanner_adaptor::{AdaptorState, DisposableScannerAdaptor};
