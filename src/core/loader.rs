//! Purpose: Load the packaged native library into this process exactly once.
//! Exports: `NativeLoader`, `LibraryLoader`, `DynamicLibraryLoader`, `ensure_loaded`.
//! Role: Public entry point; drives extract → tag → load → background sweep.
//! Invariants: At most one successful load per `NativeLoader`; the state never resets.
//! Invariants: Attempts are serialized; a rejected load deletes its artifact and leaves state unset.
//! Invariants: The sweeper starts only after the loaded state is published.
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind};
use crate::core::exit_cleanup::delete_on_exit;
use crate::core::extract::{ExtractedArtifact, extract};
use crate::core::platform::PlatformKey;
use crate::core::resources::{ResourceSource, StaticResources};
use crate::core::runtime_dir::{RuntimeEnv, resolve_staging_dir};
use crate::core::sweep::{SweepStats, Sweeper, spawn_sweep};

/// The OS dynamic loader, behind a seam so the load protocol can run without a real library.
pub trait LibraryLoader: Send + Sync {
    type Handle: Send + Sync;
    type Error: StdError + Send + Sync + 'static;

    fn load(&self, path: &Path) -> Result<Self::Handle, Self::Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicLibraryLoader;

impl LibraryLoader for DynamicLibraryLoader {
    type Handle = libloading::Library;
    type Error = libloading::Error;

    fn load(&self, path: &Path) -> Result<Self::Handle, Self::Error> {
        // Running the library's initializers is the point of loading it.
        unsafe { libloading::Library::new(path) }
    }
}

struct Loaded<H> {
    handle: H,
    artifact: ExtractedArtifact,
}

pub struct NativeLoader<L: LibraryLoader = DynamicLibraryLoader> {
    platform: PlatformKey,
    staging_dir: PathBuf,
    resources: Box<dyn ResourceSource>,
    loader: L,
    delete_on_exit: bool,
    attempt: Mutex<()>,
    loaded: OnceLock<Loaded<L::Handle>>,
    cleanup: Mutex<Option<JoinHandle<SweepStats>>>,
}

impl NativeLoader<DynamicLibraryLoader> {
    /// Loader for the running process: embedded resources, environment-resolved staging dir.
    pub fn from_env() -> Self {
        Self::new(
            PlatformKey::identify(),
            resolve_staging_dir(&RuntimeEnv::from_process()),
            StaticResources::embedded(),
            DynamicLibraryLoader,
        )
    }
}

impl<L: LibraryLoader> NativeLoader<L> {
    pub fn new(
        platform: PlatformKey,
        staging_dir: impl Into<PathBuf>,
        resources: impl ResourceSource + 'static,
        loader: L,
    ) -> Self {
        Self {
            platform,
            staging_dir: staging_dir.into(),
            resources: Box::new(resources),
            loader,
            delete_on_exit: true,
            attempt: Mutex::new(()),
            loaded: OnceLock::new(),
            cleanup: Mutex::new(None),
        }
    }

    pub fn with_delete_on_exit(mut self, enabled: bool) -> Self {
        self.delete_on_exit = enabled;
        self
    }

    pub fn platform(&self) -> &PlatformKey {
        &self.platform
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn library(&self) -> Option<&L::Handle> {
        self.loaded.get().map(|loaded| &loaded.handle)
    }

    /// Artifact backing the loaded library, once loaded.
    pub fn artifact(&self) -> Option<&ExtractedArtifact> {
        self.loaded.get().map(|loaded| &loaded.artifact)
    }

    /// Blocks until the post-load sweep finishes. `None` if no sweep was started or it panicked.
    pub fn wait_for_cleanup(&self) -> Option<SweepStats> {
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        handle.join().ok()
    }

    pub fn ensure_loaded(&self) -> Result<&L::Handle, Error> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(&loaded.handle);
        }

        let _attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = self.loaded.get() {
            return Ok(&loaded.handle);
        }

        if !self.platform.is_supported() {
            return Err(Error::new(ErrorKind::UnsupportedPlatform).with_message(format!(
                "no native library for {:?}/{} (64-bit: {})",
                self.platform.os_family, self.platform.arch, self.platform.is_64bit
            )));
        }

        let artifact = extract(&self.platform, self.resources.as_ref(), &self.staging_dir)?;
        if self.delete_on_exit {
            delete_on_exit(artifact.path.clone());
        }
        if let Err(err) = artifact.write_liveness_tag(std::process::id()) {
            artifact.remove();
            return Err(err);
        }
        if self.delete_on_exit {
            if let Some(tag_path) = &artifact.tag_path {
                delete_on_exit(tag_path.clone());
            }
        }

        let handle = match self.loader.load(&artifact.path) {
            Ok(handle) => handle,
            Err(err) => {
                debug!(path = %artifact.path.display(), error = %err, "native library rejected");
                artifact.remove();
                return Err(Error::new(ErrorKind::LoadRejected)
                    .with_message("dynamic loader rejected the native library")
                    .with_path(&artifact.path)
                    .with_source(err));
            }
        };

        info!(path = %artifact.path.display(), "loaded native library");
        let loaded = self.loaded.get_or_init(move || Loaded { handle, artifact });
        self.start_cleanup();
        Ok(&loaded.handle)
    }

    fn start_cleanup(&self) {
        let sweeper = Sweeper::new(self.staging_dir.clone(), self.platform.os_family);
        match spawn_sweep(sweeper) {
            Ok(handle) => {
                *self.cleanup.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => debug!(error = %err, "could not start staging sweep"),
        }
    }
}

static PROCESS_LOADER: LazyLock<NativeLoader> = LazyLock::new(NativeLoader::from_env);

/// Makes the native library available to this process, extracting and loading it on first use.
pub fn ensure_loaded() -> Result<&'static libloading::Library, Error> {
    PROCESS_LOADER.ensure_loaded()
}
