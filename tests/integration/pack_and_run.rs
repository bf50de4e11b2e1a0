//! Packing a project and running the artifact end to end.

use std::{fs, os::unix::fs::PermissionsExt as _, path::Path};

use luapack_common::{
    EXIT_EXEC, EXIT_FORMAT, EXTRACTION_DIR_PREFIX, PackageMetadata, compose_image, locate_trailer,
};
use nix::sys::signal::Signal;

use crate::common::{
    Fixture, SIGNAL_TRAPPING_INTERPRETER, launcher_bin, reported, send_signal, stderr, stdout,
};

#[test]
fn artifact_is_launcher_followed_by_trailer() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let launcher = fs::read(launcher_bin()).expect("failed to read launcher");
    let image = fs::read(&artifact).expect("failed to read artifact");
    assert!(image.starts_with(&launcher), "artifact must start with the stub");

    let (stub_len, metadata) = locate_trailer(&image).expect("trailer must parse");
    assert_eq!(stub_len, launcher.len());
    assert_eq!(metadata.compiler_path, "bin/lua");
    assert_eq!(metadata.entry_script_path, "main.lua");

    let mode = fs::metadata(&artifact).expect("stat artifact").permissions().mode();
    assert_eq!(mode & 0o111, 0o111, "artifact must be executable");
}

#[test]
fn runs_interpreter_with_entry_and_forwarded_args() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let out = fixture.run(&artifact, &["--x", "1"], &[], b"");
    assert!(out.status.success(), "run failed: {}", stderr(&out));
    assert_eq!(reported(&stdout(&out), "argv"), "main.lua --x 1");
}

#[test]
fn interpreter_runs_in_a_fresh_extraction_root_removed_afterwards() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let out = fixture.run(&artifact, &[], &[], b"");
    assert!(out.status.success(), "run failed: {}", stderr(&out));

    let out = stdout(&out);
    let cwd = Path::new(reported(&out, "cwd"));
    let base = fixture
        .extraction_base()
        .canonicalize()
        .expect("canonicalize extraction base");
    assert_eq!(cwd.parent(), Some(base.as_path()));
    assert!(
        cwd.file_name()
            .expect("cwd has a name")
            .to_string_lossy()
            .starts_with(EXTRACTION_DIR_PREFIX),
        "unexpected cwd {cwd:?}"
    );
    assert!(!cwd.exists(), "extraction root must be removed");
    assert!(fixture.leftover_runs().is_empty());
}

#[test]
fn each_run_gets_its_own_root() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let first = stdout(&fixture.run(&artifact, &[], &[], b""));
    let second = stdout(&fixture.run(&artifact, &[], &[], b""));
    assert_ne!(reported(&first, "cwd"), reported(&second, "cwd"));
}

#[test]
fn stdin_is_passed_through() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let input = b"hello from stdin\n\x00\xff raw bytes";
    let out = fixture.run(&artifact, &[], &[], input);
    assert!(out.status.success(), "run failed: {}", stderr(&out));
    assert!(out.stdout.ends_with(input), "{}", stdout(&out));
}

#[test]
fn exit_status_is_propagated_and_root_still_removed() {
    let fixture = Fixture::new();
    let artifact = fixture.pack_ok();

    let out = fixture.run(&artifact, &[], &[("EXIT_CODE", "7")], b"");
    assert_eq!(out.status.code(), Some(7));
    assert!(fixture.leftover_runs().is_empty());
}

#[test]
fn lost_execute_bit_is_restored() {
    let fixture = Fixture::new();
    // Interpreter checked in without any execute bit.
    fixture.write("bin/lua", crate::common::FAKE_INTERPRETER, 0o644);
    let artifact = fixture.pack_ok();

    let out = fixture.run(&artifact, &[], &[], b"");
    assert!(out.status.success(), "run failed: {}", stderr(&out));
    assert_eq!(reported(&stdout(&out), "argv"), "main.lua");
}

#[test]
fn nested_entry_script_is_passed_relative() {
    let fixture = Fixture::new();
    fixture.write("src/app/main.lua", "print('nested')\n", 0o644);
    let out = fixture.pack("bin/lua", "src/app/main.lua", &[]);
    assert!(out.status.success(), "packer failed: {}", stderr(&out));

    let out = fixture.run(&fixture.output(), &["a"], &[], b"");
    assert!(out.status.success(), "run failed: {}", stderr(&out));
    assert_eq!(reported(&stdout(&out), "argv"), "src/app/main.lua a");
}

#[test]
fn every_compression_method_runs() {
    for method in ["stored", "deflated", "zstd"] {
        let fixture = Fixture::new();
        let out = fixture.pack("bin/lua", "main.lua", &["--compression", method]);
        assert!(out.status.success(), "{method}: packer failed: {}", stderr(&out));

        let out = fixture.run(&fixture.output(), &[], &[], b"");
        assert!(out.status.success(), "{method}: run failed: {}", stderr(&out));
    }
}

#[test]
fn non_executable_interpreter_content_fails_to_start() {
    let fixture = Fixture::empty();
    fixture.write("bin/lua", "BINARY", 0o755);
    fixture.write("main.lua", "print('hi')", 0o644);
    let artifact = fixture.pack_ok();

    let out = fixture.run(&artifact, &[], &[], b"");
    assert_eq!(out.status.code(), Some(EXIT_EXEC));
    assert!(stderr(&out).contains("exec"), "unexpected stderr: {}", stderr(&out));
    assert!(fixture.leftover_runs().is_empty());
}

fn assert_signal_reaches_interpreter(signal: Signal, trap_code: i32) {
    let fixture = Fixture::new();
    fixture.write("bin/lua", SIGNAL_TRAPPING_INTERPRETER, 0o755);
    let artifact = fixture.pack_ok();

    let (child, first_line) = fixture.start_until_first_line(&artifact);
    assert_eq!(first_line, "ready\n");
    assert_eq!(fixture.leftover_runs().len(), 1, "extraction root exists while running");

    send_signal(&child, signal);
    let out = child.wait_with_output().expect("failed to wait on artifact");
    assert_eq!(
        out.status.code(),
        Some(trap_code),
        "{signal:?} not relayed, stderr: {}",
        stderr(&out)
    );
    assert!(fixture.leftover_runs().is_empty());
}

#[test]
fn terminate_is_relayed_and_root_removed() {
    assert_signal_reaches_interpreter(Signal::SIGTERM, 3);
}

#[test]
fn interrupt_sent_to_the_launcher_alone_is_relayed() {
    assert_signal_reaches_interpreter(Signal::SIGINT, 4);
}

#[test]
fn corrupt_archive_still_removes_extraction_root() {
    let fixture = Fixture::empty();
    let stub = fs::read(launcher_bin()).expect("failed to read launcher");
    let metadata = PackageMetadata {
        compiler_path: "bin/lua".to_string(),
        entry_script_path: "main.lua".to_string(),
        archive: b"PK\x03\x04 but not really a zip".to_vec(),
    };
    let artifact = fixture.output();
    fs::write(&artifact, compose_image(&stub, &metadata).expect("compose"))
        .expect("failed to write artifact");
    fs::set_permissions(&artifact, fs::Permissions::from_mode(0o755))
        .expect("failed to set permissions");

    let out = fixture.run(&artifact, &[], &[], b"");
    assert_eq!(out.status.code(), Some(EXIT_FORMAT), "stderr: {}", stderr(&out));
    assert!(stderr(&out).contains("extract"), "unexpected stderr: {}", stderr(&out));
    assert!(fixture.leftover_runs().is_empty());
}
