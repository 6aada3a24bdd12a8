//! Purpose: Materialize, load, and reclaim the embedded ipcsocket native library.
//! Exports: `core` (platform, staging, extraction, loading, sweeping, errors) and `ensure_loaded`.
//! Role: Library backing the `ipcsocket-native` CLI and any crate that needs the native routines.
//! Invariants: The library is loaded at most once per process; `ensure_loaded` is the only entry point.
//! Invariants: Staging-directory mutations are safe under uncoordinated multi-process access.
pub mod core;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::loader::{NativeLoader, ensure_loaded};
