//! Common utilities for integration tests.
//!
//! Builds throwaway projects with a `/bin/sh` script standing in for the interpreter, packs
//! them with the real `packer` binary and runs the results.

use std::{
    fs,
    io::{self, BufRead as _, BufReader, Write as _},
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    process::{Child, Command, Output, Stdio},
    thread,
    time::Duration,
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tempfile::TempDir;

/// Prints its arguments and working directory, echoes stdin and exits with `$EXIT_CODE`.
pub const FAKE_INTERPRETER: &str = r#"#!/bin/sh
echo "argv: $*"
echo "cwd: $(pwd -P)"
cat
exit "${EXIT_CODE:-0}"
"#;

/// Announces itself, then sleeps until SIGTERM (exit 3) or SIGINT (exit 4) arrives.
pub const SIGNAL_TRAPPING_INTERPRETER: &str = r#"#!/bin/sh
trap 'kill $SLEEPER; exit 3' TERM
trap 'kill $SLEEPER; exit 4' INT
sleep 30 >/dev/null 2>&1 &
SLEEPER=$!
echo ready
wait
"#;

pub fn packer_bin() -> &'static str {
    env!("CARGO_BIN_EXE_packer")
}

pub fn launcher_bin() -> &'static str {
    env!("CARGO_BIN_EXE_launcher")
}

/// A project on disk plus a scratch area for outputs and extraction roots.
pub struct Fixture {
    pub project: TempDir,
    pub scratch: TempDir,
}

impl Fixture {
    /// Project with `bin/lua` (the fake interpreter), `main.lua` and a nested data file.
    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture.write("bin/lua", FAKE_INTERPRETER, 0o755);
        fixture.write("main.lua", "print('hi')\n", 0o644);
        fixture.write("lib/util.lua", "return {}\n", 0o644);
        fixture
    }

    pub fn empty() -> Self {
        Self {
            project: tempfile::tempdir().expect("failed to create project dir"),
            scratch: tempfile::tempdir().expect("failed to create scratch dir"),
        }
    }

    pub fn write(&self, relative: &str, content: &str, mode: u32) {
        let path = self.project.path().join(relative);
        fs::create_dir_all(path.parent().expect("relative path has a parent"))
            .expect("failed to create parent dir");
        fs::write(&path, content).expect("failed to write project file");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .expect("failed to set permissions");
    }

    pub fn output(&self) -> PathBuf {
        self.scratch.path().join("app")
    }

    /// Directory the launcher is pointed at through `LUAPACK_TMPDIR`.
    pub fn extraction_base(&self) -> PathBuf {
        let base = self.scratch.path().join("runs");
        fs::create_dir_all(&base).expect("failed to create extraction base");
        base
    }

    /// Runs `packer pack` with the built launcher as stub.
    pub fn pack(&self, compiler: &str, entry: &str, extra: &[&str]) -> Output {
        Command::new(packer_bin())
            .arg("pack")
            .arg(self.project.path())
            .arg(compiler)
            .arg(entry)
            .arg(self.output())
            .arg("--stub")
            .arg(launcher_bin())
            .args(extra)
            .output()
            .expect("failed to run packer")
    }

    /// Packs the default project and panics on failure.
    pub fn pack_ok(&self) -> PathBuf {
        let out = self.pack("bin/lua", "main.lua", &[]);
        assert!(out.status.success(), "packer failed: {}", stderr(&out));
        self.output()
    }

    /// Runs a packed artifact, feeding it `stdin`.
    pub fn run(&self, artifact: &Path, args: &[&str], envs: &[(&str, &str)], stdin: &[u8]) -> Output {
        let mut cmd = Command::new(artifact);
        cmd.args(args)
            .env("LUAPACK_TMPDIR", self.extraction_base())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for &(k, v) in envs {
            cmd.env(k, v);
        }
        let mut child = spawn_retrying_busy(&mut cmd);
        child
            .stdin
            .take()
            .expect("stdin is piped")
            .write_all(stdin)
            .expect("failed to write stdin");
        child.wait_with_output().expect("failed to wait on artifact")
    }

    /// Starts a packed artifact with piped stdout and returns once the interpreter has
    /// printed its first line.
    pub fn start_until_first_line(&self, artifact: &Path) -> (Child, String) {
        let mut cmd = Command::new(artifact);
        cmd.env("LUAPACK_TMPDIR", self.extraction_base())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = spawn_retrying_busy(&mut cmd);
        let mut line = String::new();
        BufReader::new(child.stdout.as_mut().expect("stdout is piped"))
            .read_line(&mut line)
            .expect("failed to read first line");
        (child, line)
    }

    /// Entries left behind in the extraction base.
    pub fn leftover_runs(&self) -> Vec<PathBuf> {
        fs::read_dir(self.extraction_base())
            .expect("failed to list extraction base")
            .map(|e| e.expect("failed to read dir entry").path())
            .collect()
    }
}

/// Spawns `cmd`, retrying while another test's forked child still holds a write handle
/// to the executable.
fn spawn_retrying_busy(cmd: &mut Command) -> Child {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            Ok(child) => return child,
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempts < 20 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => panic!("failed to start artifact: {e}"),
        }
    }
}

/// Sends `signal` to the process `child`, and to it alone.
pub fn send_signal(child: &Child, signal: Signal) {
    let pid = i32::try_from(child.id()).expect("pid fits in i32");
    kill(Pid::from_raw(pid), signal).expect("failed to send signal");
}

pub fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

pub fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// Value of a `key: value` line printed by the fake interpreter.
pub fn reported<'out>(stdout: &'out str, key: &str) -> &'out str {
    let prefix = format!("{key}: ");
    stdout
        .lines()
        .find_map(|l| l.strip_prefix(&prefix))
        .unwrap_or_else(|| panic!("no `{key}` line in output: {stdout}"))
}
