//! Purpose: Look up packaged native libraries by resource key.
//! Exports: `ResourceSource`, `StaticResources`, `DirectoryResources`.
//! Role: Interface to the packaging system; the loader only sees `open(key)`.
//! Invariants: A missing key yields `None`; callers turn that into `ResourceNotFound`.
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/embedded_natives.rs"));
}

pub trait ResourceSource: Send + Sync {
    fn open(&self, key: &str) -> Option<Box<dyn Read + '_>>;
}

/// In-memory table of `(key, bytes)` pairs.
#[derive(Clone, Copy, Debug)]
pub struct StaticResources {
    entries: &'static [(&'static str, &'static [u8])],
}

impl StaticResources {
    pub const fn new(entries: &'static [(&'static str, &'static [u8])]) -> Self {
        Self { entries }
    }

    /// Libraries embedded from `native/` at build time for the target OS.
    pub fn embedded() -> Self {
        Self::new(embedded::EMBEDDED)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }
}

impl ResourceSource for StaticResources {
    fn open(&self, key: &str) -> Option<Box<dyn Read + '_>> {
        self.entries
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, bytes)| Box::new(Cursor::new(*bytes)) as Box<dyn Read>)
    }
}

/// Resolves keys as relative paths under an unpacked distribution directory.
#[derive(Clone, Debug)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceSource for DirectoryResources {
    fn open(&self, key: &str) -> Option<Box<dyn Read + '_>> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == ".." {
                return None;
            }
            path.push(segment);
        }
        File::open(path)
            .ok()
            .map(|file| Box::new(file) as Box<dyn Read>)
    }
}
