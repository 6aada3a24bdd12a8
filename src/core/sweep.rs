//! Purpose: Reclaim artifacts left in the staging directory by processes that are gone.
//! Exports: `Sweeper`, `SweepStats`, `ReclaimStrategy`, `strategy_for`, `spawn_sweep`.
//! Role: Best-effort janitor started once after a successful load; also runnable on demand.
//! Invariants: Files without the artifact prefix are never touched.
//! Invariants: Pid-tagged artifacts are deleted only on positive evidence the owner is dead.
//! Invariants: No failure aborts the walk or propagates to the caller.
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::core::extract::{ARTIFACT_PREFIX, artifact_path_for_tag};
use crate::core::liveness::{Liveness, LivenessProbe, OsLivenessProbe, parse_tag};
use crate::core::platform::OsFamily;

const CLEANUP_THREAD_NAME: &str = "ipcsocket-native-cleanup";
const MAX_TAG_LEN: u64 = 32;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SweepStats {
    pub inspected: usize,
    pub removed_files: usize,
    pub removed_dirs: usize,
}

/// Per-OS-family policy for one prefix-matching file. Returns how many files were removed.
pub trait ReclaimStrategy: Send + Sync {
    fn reclaim(&self, file: &Path, probe: &dyn LivenessProbe) -> usize;
}

/// Open handles block deletion, so the OS refuses to delete files a live process still maps.
struct HandleLocked;

/// Deletion is never blocked by the OS; ownership comes from the `.pid` sidecar.
struct PidTagged;

impl ReclaimStrategy for HandleLocked {
    fn reclaim(&self, file: &Path, _probe: &dyn LivenessProbe) -> usize {
        usize::from(try_remove(file) == Removal::Removed)
    }
}

impl ReclaimStrategy for PidTagged {
    fn reclaim(&self, file: &Path, probe: &dyn LivenessProbe) -> usize {
        let Some(artifact) = artifact_path_for_tag(file) else {
            return 0;
        };
        let Some(contents) = read_tag(file) else {
            trace!(tag = %file.display(), "unreadable liveness tag");
            return 0;
        };
        let Some(pid) = parse_tag(&contents) else {
            trace!(tag = %file.display(), "unrecoverable liveness tag");
            return 0;
        };
        if probe.probe(pid) == Liveness::Alive {
            return 0;
        }

        debug!(pid, artifact = %artifact.display(), "reclaiming artifact of dead process");
        let mut removed = 0;
        match try_remove(&artifact) {
            Removal::Removed => removed += 1,
            Removal::Missing => {}
            // Keep the tag so a later sweep can retry; an untagged artifact is never reclaimed.
            Removal::Failed => return removed,
        }
        if try_remove(file) == Removal::Removed {
            removed += 1;
        }
        removed
    }
}

/// Reads a tag no longer than `MAX_TAG_LEN`; oversized or non-UTF-8 files yield `None`.
fn read_tag(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut contents = String::new();
    file.take(MAX_TAG_LEN + 1).read_to_string(&mut contents).ok()?;
    (contents.len() as u64 <= MAX_TAG_LEN).then_some(contents)
}

static HANDLE_LOCKED: HandleLocked = HandleLocked;
static PID_TAGGED: PidTagged = PidTagged;

pub fn strategy_for(family: OsFamily) -> &'static dyn ReclaimStrategy {
    match family {
        OsFamily::Windows => &HANDLE_LOCKED,
        OsFamily::Mac | OsFamily::Linux | OsFamily::Unsupported => &PID_TAGGED,
    }
}

pub struct Sweeper<P: LivenessProbe = OsLivenessProbe> {
    staging_dir: PathBuf,
    strategy: &'static dyn ReclaimStrategy,
    probe: P,
}

impl Sweeper<OsLivenessProbe> {
    pub fn new(staging_dir: impl Into<PathBuf>, family: OsFamily) -> Self {
        Self::with_probe(staging_dir, family, OsLivenessProbe)
    }
}

impl<P: LivenessProbe> Sweeper<P> {
    pub fn with_probe(staging_dir: impl Into<PathBuf>, family: OsFamily, probe: P) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            strategy: strategy_for(family),
            probe,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn run(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let walker = WalkDir::new(&self.staging_dir)
            .follow_links(false)
            .contents_first(true);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    trace!(error = %err, "skipping unreadable staging entry");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                if remove_dir_if_empty(entry.path()) {
                    stats.removed_dirs += 1;
                }
                continue;
            }
            if !file_type.is_file() || !has_artifact_prefix(entry.path()) {
                continue;
            }
            stats.inspected += 1;
            stats.removed_files += self.strategy.reclaim(entry.path(), &self.probe);
        }

        debug!(
            dir = %self.staging_dir.display(),
            inspected = stats.inspected,
            removed_files = stats.removed_files,
            removed_dirs = stats.removed_dirs,
            "staging sweep finished"
        );
        stats
    }
}

/// Runs `sweeper` on a detached, named background thread.
pub fn spawn_sweep<P>(sweeper: Sweeper<P>) -> io::Result<JoinHandle<SweepStats>>
where
    P: LivenessProbe + 'static,
{
    thread::Builder::new()
        .name(CLEANUP_THREAD_NAME.to_string())
        .spawn(move || sweeper.run())
}

fn has_artifact_prefix(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Removal {
    Removed,
    Missing,
    Failed,
}

fn try_remove(path: &Path) -> Removal {
    match fs::remove_file(path) {
        Ok(()) => Removal::Removed,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Removal::Missing,
        Err(err) => {
            trace!(path = %path.display(), error = %err, "artifact still held");
            Removal::Failed
        }
    }
}

fn remove_dir_if_empty(dir: &Path) -> bool {
    match fs::remove_dir(dir) {
        Ok(()) => true,
        // Not-empty is the common case; every other failure is equally ignorable.
        Err(err) => {
            trace!(dir = %dir.display(), error = %err, "staging directory kept");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProbe {
        alive: HashSet<u32>,
        probed: Mutex<Vec<u32>>,
    }

    impl FakeProbe {
        fn alive(pids: &[u32]) -> Self {
            Self {
                alive: pids.iter().copied().collect(),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    impl LivenessProbe for FakeProbe {
        fn probe(&self, pid: u32) -> Liveness {
            self.probed.lock().expect("lock").push(pid);
            if self.alive.contains(&pid) {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        }
    }

    fn place(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn dead_owner_artifact_and_tag_are_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).expect("mkdir");
        let artifact = place(&staging, "libsbtipcsocketAAAA.so", "lib");
        let tag = place(&staging, "libsbtipcsocketAAAA.so.pid", "41");

        let stats = Sweeper::with_probe(&staging, OsFamily::Linux, FakeProbe::alive(&[])).run();

        assert!(!artifact.exists());
        assert!(!tag.exists());
        assert_eq!(stats.removed_files, 2);
        assert!(!staging.exists());
        assert_eq!(stats.removed_dirs, 1);
    }

    #[test]
    fn oversized_tag_is_not_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifact = place(temp.path(), "libsbtipcsocketEEEE.so", "lib");
        let padded = format!("41{}", " ".repeat(4096));
        let tag = place(temp.path(), "libsbtipcsocketEEEE.so.pid", &padded);

        let sweeper = Sweeper::with_probe(temp.path(), OsFamily::Linux, FakeProbe::alive(&[]));
        let stats = sweeper.run();

        assert!(artifact.exists());
        assert!(tag.exists());
        assert_eq!(stats.removed_files, 0);
        assert!(sweeper.probe.probed.lock().expect("lock").is_empty());
    }

    #[test]
    fn live_owner_artifact_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifact = place(temp.path(), "libsbtipcsocketBBBB.so", "lib");
        let tag = place(temp.path(), "libsbtipcsocketBBBB.so.pid", "77\n");
        let probe = FakeProbe::alive(&[77]);

        let sweeper = Sweeper::with_probe(temp.path(), OsFamily::Linux, probe);
        let stats = sweeper.run();

        assert!(artifact.exists());
        assert!(tag.exists());
        assert_eq!(stats.removed_files, 0);
        assert_eq!(*sweeper.probe.probed.lock().expect("lock"), vec![77]);
    }

    #[test]
    fn untagged_or_garbled_artifacts_are_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let untagged = place(temp.path(), "libsbtipcsocketCCCC.so", "lib");
        let garbled = place(temp.path(), "libsbtipcsocketDDDD.so", "lib");
        let garbled_tag = place(temp.path(), "libsbtipcsocketDDDD.so.pid", "not-a-pid");

        let sweeper = Sweeper::with_probe(temp.path(), OsFamily::Mac, FakeProbe::alive(&[]));
        let stats = sweeper.run();

        assert!(untagged.exists());
        assert!(garbled.exists());
        assert!(garbled_tag.exists());
        assert_eq!(stats.inspected, 3);
        assert!(sweeper.probe.probed.lock().expect("lock").is_empty());
    }

    #[test]
    fn foreign_files_are_never_touched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let foreign = place(temp.path(), "other.so", "x");
        let foreign_tag = place(temp.path(), "other.so.pid", "41");
        let lookalike = place(temp.path(), "sbtipcsocket.dll", "x");

        for family in [OsFamily::Linux, OsFamily::Windows] {
            let stats = Sweeper::with_probe(temp.path(), family, FakeProbe::alive(&[])).run();
            assert_eq!(stats.inspected, 0);
            assert_eq!(stats.removed_files, 0);
        }
        assert!(foreign.exists());
        assert!(foreign_tag.exists());
        assert!(lookalike.exists());
        assert!(temp.path().exists());
    }

    #[test]
    fn handle_locked_strategy_deletes_unheld_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).expect("mkdir");
        let artifact = place(&staging, "libsbtipcsocketEEEE.dll", "pe");

        let stats = Sweeper::with_probe(&staging, OsFamily::Windows, FakeProbe::alive(&[])).run();

        assert!(!artifact.exists());
        assert_eq!(stats.removed_files, 1);
        assert!(!staging.exists());
    }

    #[test]
    fn nested_directories_are_swept_bottom_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        let nested = staging.join("old").join("deeper");
        fs::create_dir_all(&nested).expect("mkdir");
        place(&nested, "libsbtipcsocketFFFF.so", "lib");
        place(&nested, "libsbtipcsocketFFFF.so.pid", "12");
        let keep_dir = staging.join("keep");
        fs::create_dir_all(&keep_dir).expect("mkdir");
        let kept = place(&keep_dir, "notes.txt", "hello");

        let stats = Sweeper::with_probe(&staging, OsFamily::Linux, FakeProbe::alive(&[])).run();

        assert!(!staging.join("old").exists());
        assert!(kept.exists());
        assert!(staging.exists());
        assert_eq!(stats.removed_dirs, 2);
    }

    #[test]
    fn missing_staging_dir_is_a_quiet_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stats = Sweeper::new(temp.path().join("absent"), OsFamily::Linux).run();
        assert_eq!(stats, SweepStats::default());
    }

    #[test]
    fn strategy_table_covers_every_family() {
        let temp = tempfile::tempdir().expect("tempdir");
        let untagged = place(temp.path(), "libsbtipcsocketGGGG.so", "lib");
        let probe = FakeProbe::alive(&[]);
        for family in [OsFamily::Mac, OsFamily::Linux, OsFamily::Unsupported] {
            assert_eq!(strategy_for(family).reclaim(&untagged, &probe), 0);
        }
        assert!(untagged.exists());
        assert_eq!(strategy_for(OsFamily::Windows).reclaim(&untagged, &probe), 1);
        assert!(!untagged.exists());
    }

    #[test]
    fn spawned_sweep_runs_to_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).expect("mkdir");
        place(&staging, "libsbtipcsocketHHHH.so", "lib");
        place(&staging, "libsbtipcsocketHHHH.so.pid", "9");

        let handle = spawn_sweep(Sweeper::with_probe(
            &staging,
            OsFamily::Linux,
            FakeProbe::alive(&[]),
        ))
        .expect("spawn");
        assert_eq!(handle.thread().name(), Some("ipcsocket-native-cleanup"));
        let stats = handle.join().expect("join");
        assert_eq!(stats.removed_files, 2);
        assert!(!staging.exists());
    }
}
