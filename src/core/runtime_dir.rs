//! Purpose: Resolve the shared staging directory for extracted native libraries.
//! Exports: `RuntimeEnv`, `resolve_staging_dir`, `OVERRIDE_ENV`.
//! Role: Every participant (loader and sweeper, in any process) resolves the same path.
//! Invariants: Resolution is deterministic for identical inputs; the override is used verbatim.
//! Invariants: Per-user separation comes from a hash of the home path, never from the pid.
use std::ffi::OsString;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Environment variable that replaces the computed staging directory.
pub const OVERRIDE_ENV: &str = "SBT_IPCSOCKET_TMPDIR";

const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";
const UNKNOWN_HOME: &str = "unknown_home";
const MECHANISM_SEGMENT: &str = "ipcsocket";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeEnv {
    pub override_dir: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub home: Option<OsString>,
}

impl RuntimeEnv {
    pub fn from_process() -> Self {
        Self {
            override_dir: non_empty_var(OVERRIDE_ENV).map(PathBuf::from),
            runtime_dir: non_empty_var(RUNTIME_DIR_ENV).map(PathBuf::from),
            temp_dir: std::env::temp_dir(),
            home: home_var(),
        }
    }

    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }
}

pub fn resolve_staging_dir(env: &RuntimeEnv) -> PathBuf {
    if let Some(dir) = &env.override_dir {
        return dir.clone();
    }
    let base = env.runtime_dir.as_ref().unwrap_or(&env.temp_dir);
    let home = env
        .home
        .clone()
        .unwrap_or_else(|| OsString::from(UNKNOWN_HOME));
    base.join(format!(".sbt{}", home_token(&home)))
        .join(MECHANISM_SEGMENT)
}

fn home_token(home: &OsString) -> String {
    let digest = Sha256::digest(home.to_string_lossy().as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn non_empty_var(name: &str) -> Option<OsString> {
    std::env::var_os(name).filter(|value| !value.is_empty())
}

fn home_var() -> Option<OsString> {
    #[cfg(windows)]
    {
        non_empty_var("USERPROFILE").or_else(|| non_empty_var("HOME"))
    }
    #[cfg(not(windows))]
    {
        non_empty_var("HOME")
    }
}
