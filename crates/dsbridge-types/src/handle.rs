//! Opaque handle vocabulary shared by the registry and the C ABI.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of native object a handle refers to. Kinds are never
/// interchangeable: a scanner handle cannot be released as a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    DatasetFactory,
    Dataset,
    Scanner,
    Buffer,
    MemoryPool,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DatasetFactory => "dataset_factory",
            Self::Dataset => "dataset",
            Self::Scanner => "scanner",
            Self::Buffer => "buffer",
            Self::MemoryPool => "memory_pool",
        };
        f.write_str(s)
    }
}

/// Opaque 64-bit identifier handed to the host. `0` is the null handle and
/// is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i64);

impl Handle {
    /// The reserved null handle.
    pub const NULL: Handle = Handle(0);

    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for i64 {
    fn from(h: Handle) -> Self {
        h.0
    }
}
