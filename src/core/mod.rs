// Core modules implementing platform naming, extraction, loading, and reclamation.
pub mod error;
pub mod exit_cleanup;
pub mod extract;
pub mod liveness;
pub mod loader;
pub mod platform;
pub mod resources;
pub mod runtime_dir;
pub mod sweep;
