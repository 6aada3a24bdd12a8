//! Purpose: Copy a packaged native library into a uniquely named staging file.
//! Exports: `ExtractedArtifact`, `extract`, `ARTIFACT_PREFIX`, `TAG_SUFFIX`, `tag_path_for`.
//! Role: Produces the file the OS loader maps; one artifact per load attempt.
//! Invariants: Names are `<ARTIFACT_PREFIX><random><ext>` created exclusively (no collisions).
//! Invariants: The returned file is fully written, flushed, and closed.
//! Invariants: A failed copy leaves no partial artifact behind.
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::platform::PlatformKey;
use crate::core::resources::ResourceSource;

/// Shared file-name prefix of every artifact; the sweeper's selection key.
pub const ARTIFACT_PREFIX: &str = "libsbtipcsocket";
pub const TAG_SUFFIX: &str = ".pid";

const RANDOM_LEN: usize = 12;
const CREATE_ATTEMPTS: usize = 5;
const TAG_STAGING_PREFIX: &str = ".ipcsocket-tag";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractedArtifact {
    pub path: PathBuf,
    pub tag_path: Option<PathBuf>,
}

impl ExtractedArtifact {
    /// Writes the decimal `pid` into the tag file, if this platform uses tags.
    ///
    /// The tag is written to a sibling file and renamed into place, so a concurrent
    /// sweep sees either no tag or a complete one.
    pub fn write_liveness_tag(&self, pid: u32) -> Result<(), Error> {
        let Some(tag_path) = &self.tag_path else {
            return Ok(());
        };
        let tag_error = |err: io::Error| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write liveness tag")
                .with_path(tag_path)
                .with_source(err)
        };
        let dir = tag_path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::Builder::new()
            .prefix(TAG_STAGING_PREFIX)
            .tempfile_in(dir)
            .map_err(tag_error)?;
        staged
            .write_all(pid.to_string().as_bytes())
            .and_then(|()| staged.flush())
            .map_err(tag_error)?;
        staged
            .persist(tag_path)
            .map(drop)
            .map_err(|err| tag_error(err.error))
    }

    /// Deletes the artifact and its tag, ignoring files that are already gone.
    pub fn remove(&self) {
        remove_if_exists(&self.path);
        if let Some(tag_path) = &self.tag_path {
            remove_if_exists(tag_path);
        }
    }
}

pub fn tag_path_for(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(TAG_SUFFIX);
    PathBuf::from(name)
}

/// Inverse of `tag_path_for`; `None` unless `tag` names a `.pid` sidecar.
pub fn artifact_path_for_tag(tag: &Path) -> Option<PathBuf> {
    let name = tag.file_name()?.to_str()?;
    let artifact = name.strip_suffix(TAG_SUFFIX)?;
    if artifact.is_empty() {
        return None;
    }
    Some(tag.with_file_name(artifact))
}

pub fn extract(
    platform: &PlatformKey,
    resources: &dyn ResourceSource,
    staging_dir: &Path,
) -> Result<ExtractedArtifact, Error> {
    let key = platform.resource_key();
    let mut reader = resources.open(&key).ok_or_else(|| {
        Error::new(ErrorKind::ResourceNotFound)
            .with_message("native library is not packaged for this platform")
            .with_resource(key.clone())
    })?;

    let mut file = create_unique(staging_dir, platform.extension())?;
    let copied = match copy_into(&mut reader, file.as_file_mut()) {
        Ok(copied) => copied,
        Err(err) => {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to copy native library")
                .with_path(file.path())
                .with_source(err));
        }
    };

    // Dropping the handle here closes it before the loader opens the path.
    let path = file.into_temp_path().keep().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to persist extracted library")
            .with_source(err.error)
    })?;

    debug!(path = %path.display(), bytes = copied, resource = %key, "extracted native library");

    let tag_path = platform
        .writes_liveness_tag()
        .then(|| tag_path_for(&path));
    Ok(ExtractedArtifact { path, tag_path })
}

fn copy_into(reader: &mut dyn io::Read, file: &mut fs::File) -> io::Result<u64> {
    let copied = io::copy(reader, file)?;
    file.flush()?;
    Ok(copied)
}

fn create_unique(staging_dir: &Path, extension: &str) -> Result<tempfile::NamedTempFile, Error> {
    let mut last_err = None;
    for _ in 0..CREATE_ATTEMPTS {
        fs::create_dir_all(staging_dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create staging directory")
                .with_path(staging_dir)
                .with_source(err)
        })?;

        match tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(extension)
            .rand_bytes(RANDOM_LEN)
            .tempfile_in(staging_dir)
        {
            Ok(file) => return Ok(file),
            // A concurrent sweep removed the directory while it was still empty.
            Err(err) if err.kind() == io::ErrorKind::NotFound => last_err = Some(err),
            Err(err) => return Err(create_error(staging_dir, err)),
        }
    }
    let err = last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound));
    Err(create_error(staging_dir, err))
}

fn create_error(staging_dir: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to create artifact file")
        .with_path(staging_dir)
        .with_source(err)
}

pub(crate) fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => debug!(path = %path.display(), error = %err, "failed to remove file"),
    }
}
