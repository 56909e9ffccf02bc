#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use snr_collector::core::config::Config;
use snr_collector::link::LinkOpener;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_snrd") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "snrd.exe" } else { "snrd" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve snrd binary path for integration test"),
    }
}

/// Run the built binary with `HOME` pointed at `home` plus extra env vars.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("snrd-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("RUST_BACKTRACE", "1")
        .envs(envs.iter().copied())
        .output()
        .expect("execute snrd command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── wire fixtures ────────────────────

pub fn status_frame(day: &str, time: &str, text: &str) -> Vec<u8> {
    format!("*d[{day}]d**t[{time}]t**s[{text}]s*").into_bytes()
}

pub fn note_batch(day: &str, time: &str, notes: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut out = format!("*d{{{day}}}d**t{{{time}}}t*").into_bytes();
    for (seq, serial, payload) in notes {
        out.extend_from_slice(format!("*no{{{seq}}}no**bn{{{serial}}}bn*").as_bytes());
        out.extend_from_slice(payload);
    }
    out
}

/// One complete transaction: start frame, a two-note batch, end frame.
pub fn two_note_transaction(day: &str) -> Vec<u8> {
    let mut stream = status_frame(day, "10:00:00", "start");
    stream.extend(note_batch(
        day,
        "10:00:01",
        &[("01", "ABC123", &[1, 2]), ("02", "DEF456", &[3, 4, 5])],
    ));
    stream.extend(status_frame(day, "10:00:02", "output_end"));
    stream
}

/// Config whose every output path lives under `root`.
pub fn config_in(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.output.ini_path = root.join("SNRinfo.ini");
    cfg.output.image_root = root.join("images");
    cfg.output.log_root = root.join("logs");
    cfg.paths.activity_log = root.join("activity.jsonl");
    cfg.serial.reconnect_delay_ms = 10;
    cfg.serial.read_chunk_bytes = 16;
    cfg.parser.idle_timeout_ms = 20;
    cfg
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ──────────────────── scripted link ────────────────────

/// One step of a scripted connection.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    Fail(&'static str),
}

/// Connection that replays its steps, then idles like a port read timeout.
pub struct ScriptedConn {
    steps: VecDeque<Step>,
}

impl Read for ScriptedConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(Step::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Fail(reason)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, reason)),
            None => {
                thread::sleep(Duration::from_millis(2));
                Ok(0)
            }
        }
    }
}

/// Opener that fails `open_failures` times, then hands out the scripted
/// connections in order.
pub struct ScriptedOpener {
    pub open_failures: usize,
    pub connections: VecDeque<Vec<Step>>,
    pub opens: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    pub fn new(open_failures: usize, connections: Vec<Vec<Step>>) -> Self {
        Self {
            open_failures,
            connections: connections.into(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LinkOpener for ScriptedOpener {
    type Conn = ScriptedConn;

    fn open(&mut self) -> io::Result<Self::Conn> {
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "port not present"));
        }
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(ScriptedConn {
            steps: self.connections.pop_front().unwrap_or_default().into(),
        })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
