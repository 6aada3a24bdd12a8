//! Purpose: Delete registered files when the process exits normally.
//! Exports: `delete_on_exit`.
//! Role: Opportunistic cleanup; the sweeper covers crashes and platforms where this cannot work.
//! Invariants: Registration never fails the caller; the hook is installed at most once.
//! Invariants: Only POSIX families install the hook (loaded DLLs cannot be deleted at exit).
use std::path::PathBuf;
use std::sync::Mutex;

static PENDING: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

pub fn delete_on_exit(path: PathBuf) {
    #[cfg(unix)]
    install_hook();
    match PENDING.lock() {
        Ok(mut pending) => pending.push(path),
        Err(poisoned) => poisoned.into_inner().push(path),
    }
}

#[cfg(unix)]
fn install_hook() {
    use std::sync::Once;
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let rc = unsafe { libc::atexit(run_pending) };
        if rc != 0 {
            tracing::debug!("atexit registration failed; relying on the staging sweep");
        }
    });
}

#[cfg(unix)]
extern "C" fn run_pending() {
    // Another thread may still hold the lock while the process exits; skip rather than block.
    let Ok(mut pending) = PENDING.try_lock() else {
        return;
    };
    remove_all(&mut pending);
}

#[cfg(any(unix, test))]
fn remove_all(paths: &mut Vec<PathBuf>) {
    for path in paths.drain(..) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
pub(crate) fn pending_for_tests() -> Vec<PathBuf> {
    PENDING
        .lock()
        .map(|pending| pending.clone())
        .unwrap_or_default()
}
