use std::process::Command;

fn run(bin: &str, args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--bin", bin, "--"])
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run {bin}: {e}"))
}

/// A 32-bit little-endian RISC-V executable with one loadable code segment.
fn tiny_elf(vaddr: u32, code: &[u8]) -> Vec<u8> {
    let len = u32::try_from(code.len()).unwrap();
    let mut out = vec![0x7f, b'E', b'L', b'F', 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    for half in [2u16, 0xf3] {
        out.extend_from_slice(&half.to_le_bytes());
    }
    for word in [1u32, vaddr, 52, 0, 0] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for half in [52u16, 32, 1, 40, 0, 0] {
        out.extend_from_slice(&half.to_le_bytes());
    }
    for word in [1u32, 84, vaddr, vaddr, len, len, 5, 4] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(code);
    out
}

#[test]
fn test_runelf_help() {
    let output = run("runelf", &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: runelf"));
    assert!(stdout.contains("--verify-memload"));
}

#[test]
fn test_runelf_requires_image() {
    let output = run("runelf", &[]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage: runelf"));
}

#[test]
fn test_runelf_reports_bad_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.elf");
    std::fs::write(&path, b"not an elf").unwrap();

    let output = run("runelf", &[path.to_str().unwrap(), "--sim"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Cannot load image"));
}

#[test]
fn test_runelf_without_memory_modules() {
    let dir = tempfile::tempdir().unwrap();
    let elf = dir.path().join("app.elf");
    std::fs::write(&elf, tiny_elf(0x8000_0000, &[0x13, 0, 0, 0].repeat(4))).unwrap();
    let layout = dir.path().join("layout.json");
    std::fs::write(&layout, r#"{"modules": [{"type": "stm"}, {"type": "ctm", "core": 0}]}"#).unwrap();

    let output = run(
        "runelf",
        &[
            elf.to_str().unwrap(),
            "--sim",
            "--layout",
            layout.to_str().unwrap(),
            "--log-dir",
            dir.path().to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Target exited with code 0"));
    assert_eq!(std::fs::read_to_string(dir.path().join("stm002.log")).unwrap().lines().count(), 6);
}

#[test]
fn test_runelf_fails_when_no_memory_fits() {
    let dir = tempfile::tempdir().unwrap();
    let elf = dir.path().join("app.elf");
    std::fs::write(&elf, tiny_elf(0x8000_0000, &[0x13, 0, 0, 0])).unwrap();
    let layout = dir.path().join("layout.json");
    std::fs::write(&layout, r#"{"modules": [{"type": "mam", "regions": [{"base": 0, "size": 4096}]}]}"#).unwrap();

    let output = run("runelf", &[elf.to_str().unwrap(), "--sim", "--layout", layout.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No memory module can address"));
}

#[test]
fn test_cli_help() {
    let output = run("osd-cli", &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: osd-cli"));
    assert!(stdout.contains("--batch"));
}

#[test]
fn test_cli_batch_on_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("commands.txt");
    std::fs::write(&script, "reset -halt\nmem test\nstart\nwait 5\n").unwrap();

    let output = run("osd-cli", &["--sim", "--batch", script.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("execute: mem test"));
    assert!(stdout.contains("Memory test passed"));
    assert!(stdout.contains("Target exited with code 0"));
}

#[test]
fn test_sim_help() {
    let output = run("osd-sim", &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: osd-sim"));
}
