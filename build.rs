//! Purpose: Embed prebuilt native libraries from `native/<os>/<arch>/` into the crate.
//! Role: Cargo build-script; generates `embedded_natives.rs` in `OUT_DIR`.
//! Invariants: Only entries for the target OS prefix are embedded.
//! Invariants: A missing `native/` directory yields an empty table, never a build failure.
//! Invariants: Uses only Cargo-provided env vars (e.g. `CARGO_MANIFEST_DIR`).
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let native_dir = manifest_dir.join("native");

    println!("cargo:rerun-if-changed=native");

    let entries = match resource_prefix(&target_os) {
        Some(prefix) => collect_entries(&native_dir, prefix),
        None => Vec::new(),
    };

    let mut table = String::from("pub(crate) static EMBEDDED: &[(&str, &[u8])] = &[\n");
    for (key, path) in &entries {
        println!("cargo:rerun-if-changed={}", path.display());
        let _ = writeln!(
            table,
            "    ({key:?}, include_bytes!({:?})),",
            path.display().to_string()
        );
    }
    table.push_str("];\n");

    fs::write(out_dir.join("embedded_natives.rs"), table)
        .expect("failed to write embedded_natives.rs");
}

fn resource_prefix(target_os: &str) -> Option<&'static str> {
    match target_os {
        "macos" => Some("darwin"),
        "linux" => Some("linux"),
        "windows" => Some("win32"),
        _ => None,
    }
}

fn collect_entries(native_dir: &Path, prefix: &str) -> Vec<(String, PathBuf)> {
    let os_dir = native_dir.join(prefix);
    let Ok(arch_dirs) = fs::read_dir(&os_dir) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for arch in arch_dirs.flatten() {
        let arch_path = arch.path();
        if !arch_path.is_dir() {
            continue;
        }
        let arch_name = arch.file_name().to_string_lossy().into_owned();
        let Ok(files) = fs::read_dir(&arch_path) else {
            continue;
        };
        for file in files.flatten() {
            let file_path = file.path();
            if !file_path.is_file() {
                continue;
            }
            let file_name = file.file_name().to_string_lossy().into_owned();
            entries.push((format!("{prefix}/{arch_name}/{file_name}"), file_path));
        }
    }
    entries.sort();
    entries
}
