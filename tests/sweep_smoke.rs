// Multi-process sweep smoke test: uncoordinated sweeps never fail or over-delete.
use std::process::{Command, Stdio};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_ipcsocket-native");
    Command::new(exe)
}

#[cfg(unix)]
#[test]
fn concurrent_sweeps_converge() {
    let temp = tempfile::tempdir().expect("tempdir");
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&staging).expect("mkdir");

    let pid = std::process::id().to_string();
    for i in 0..32 {
        let name = format!("libsbtipcsocket{i:04}.so");
        std::fs::write(staging.join(&name), b"lib").expect("write");
        let owner = if i % 4 == 0 { pid.as_str() } else { "999999999" };
        std::fs::write(staging.join(format!("{name}.pid")), owner).expect("write");
    }

    let workers = 8;
    let mut children = Vec::new();
    for _ in 0..workers {
        let child = cmd()
            .args(["--tmpdir", staging.to_str().unwrap(), "sweep"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let mut remaining: Vec<String> = std::fs::read_dir(&staging)
        .expect("list")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(remaining.len(), 16);
    for i in (0..32).step_by(4) {
        let name = format!("libsbtipcsocket{i:04}.so");
        assert!(remaining.contains(&name));
        assert!(remaining.contains(&format!("{name}.pid")));
    }
}
