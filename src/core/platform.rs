//! Purpose: Identify the (os family, arch) pair that selects the native library variant.
//! Exports: `OsFamily`, `PlatformKey`, `LIBRARY_STEM`.
//! Role: Leaf of the load pipeline; pure naming logic, no filesystem access.
//! Invariants: Identification never fails; unknown inputs map to `OsFamily::Unsupported`.
//! Invariants: Mac and Windows always resolve to `x86_64` (universal / emulated binaries).
use serde::Serialize;

/// Base name of the native library, shared by the resource key and artifact prefix.
pub const LIBRARY_STEM: &str = "sbtipcsocket";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Mac,
    Linux,
    Windows,
    Unsupported,
}

impl OsFamily {
    fn from_os_name(os: &str) -> Self {
        let os = os.to_ascii_lowercase();
        if os.starts_with("mac") || os.starts_with("darwin") {
            OsFamily::Mac
        } else if os.starts_with("linux") {
            OsFamily::Linux
        } else if os.starts_with("windows") {
            OsFamily::Windows
        } else {
            OsFamily::Unsupported
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlatformKey {
    pub os_family: OsFamily,
    pub arch: String,
    pub is_64bit: bool,
}

impl PlatformKey {
    /// Platform of the running process.
    pub fn identify() -> Self {
        Self::from_parts(
            std::env::consts::OS,
            std::env::consts::ARCH,
            cfg!(target_pointer_width = "64"),
        )
    }

    pub fn from_parts(os: &str, arch: &str, is_64bit: bool) -> Self {
        let os_family = OsFamily::from_os_name(os);
        let arch = match os_family {
            OsFamily::Mac | OsFamily::Windows => "x86_64".to_string(),
            _ => normalize_arch(arch),
        };
        Self {
            os_family,
            arch,
            is_64bit,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.is_64bit && self.os_family != OsFamily::Unsupported
    }

    /// Extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self.os_family {
            OsFamily::Mac => ".dylib",
            OsFamily::Windows => ".dll",
            OsFamily::Linux | OsFamily::Unsupported => ".so",
        }
    }

    pub fn resource_prefix(&self) -> &'static str {
        match self.os_family {
            OsFamily::Mac => "darwin",
            OsFamily::Windows => "win32",
            OsFamily::Linux | OsFamily::Unsupported => "linux",
        }
    }

    pub fn library_file_name(&self) -> String {
        match self.os_family {
            OsFamily::Windows => format!("{LIBRARY_STEM}{}", self.extension()),
            _ => format!("lib{LIBRARY_STEM}{}", self.extension()),
        }
    }

    /// Lookup key into the packaged resources: `<prefix>/<arch>/<libFileName>`.
    pub fn resource_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.resource_prefix(),
            self.arch,
            self.library_file_name()
        )
    }

    /// Whether artifacts get a `.pid` liveness tag. Windows relies on open-handle locking instead.
    pub fn writes_liveness_tag(&self) -> bool {
        matches!(self.os_family, OsFamily::Mac | OsFamily::Linux)
    }
}

fn normalize_arch(arch: &str) -> String {
    let arch = arch.to_ascii_lowercase();
    if arch == "amd64" {
        return "x86_64".to_string();
    }
    arch
}
