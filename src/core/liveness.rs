//! Purpose: Answer "does a process with this pid exist right now?".
//! Exports: `Liveness`, `LivenessProbe`, `OsLivenessProbe`, `parse_tag`.
//! Role: Evidence source for the sweeper's pid-tag strategy.
//! Invariants: Only a definite "no such process" yields `Liveness::Dead`.
//! Invariants: Permission errors and unsupported platforms report `Liveness::Alive`.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Liveness {
    Alive,
    Dead,
}

pub trait LivenessProbe: Send + Sync {
    fn probe(&self, pid: u32) -> Liveness;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsLivenessProbe;

#[cfg(unix)]
impl LivenessProbe for OsLivenessProbe {
    fn probe(&self, pid: u32) -> Liveness {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Liveness::Dead;
        };
        if raw <= 0 {
            return Liveness::Alive;
        }
        // Signal 0 performs the existence and permission checks without delivering anything.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            return Liveness::Alive;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(code) if code == libc::ESRCH => Liveness::Dead,
            _ => Liveness::Alive,
        }
    }
}

#[cfg(not(unix))]
impl LivenessProbe for OsLivenessProbe {
    fn probe(&self, _pid: u32) -> Liveness {
        Liveness::Alive
    }
}

/// Parses tag file contents into a pid. Empty, malformed, or zero tags are not evidence.
pub fn parse_tag(contents: &str) -> Option<u32> {
    contents
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
}
