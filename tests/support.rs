// SPDX-License-Identifier: MIT

//! Shared harness for the workspace-level specs: a scratch project
//! directory laid out the way `lf-worker`/`lf-daemon` expect it, a
//! spawned `lfd` bound to that project, and a minimal HTTP stand-in for
//! the generative model endpoint so no test ever reaches the network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use tempfile::TempDir;

pub const DOMAIN: &str = "urgency";
pub const ANNOTATOR: u32 = 1;

/// A scratch `labelforge` project root: `config/settings.json`,
/// `config/api_keys.json`, `config/prompts/base/urgency.txt`,
/// `data/corpus.csv`, `control/`, `run/`.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new(target_count: u32, corpus_csv: &str) -> Self {
        let dir = TempDir::new().expect("create scratch project dir");
        let root = dir.path();

        std::fs::create_dir_all(root.join("config").join("prompts").join("base")).unwrap();
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::create_dir_all(root.join("control")).unwrap();

        let settings = serde_json::json!({
            "global": {
                "model_name": "gemini-pro",
                "request_delay_seconds": 0.1,
                "max_retries": 3,
                "crash_detection_minutes": 5.0,
                "control_check_iterations": 1,
                "control_check_seconds": 1
            },
            "annotators": {
                ANNOTATOR.to_string(): {
                    DOMAIN: { "enabled": true, "target_count": target_count }
                }
            }
        });
        std::fs::write(root.join("config").join("settings.json"), settings.to_string()).unwrap();

        let credentials = serde_json::json!({ format!("annotator_{ANNOTATOR}"): "test-secret" });
        std::fs::write(root.join("config").join("api_keys.json"), credentials.to_string()).unwrap();

        std::fs::write(root.join("config").join("prompts").join("base").join(format!("{DOMAIN}.txt")), "classify: {text}").unwrap();

        std::fs::write(root.join("data").join("corpus.csv"), corpus_csv).unwrap();

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// A running `lfd` bound to a [`Project`], killed on drop.
pub struct Daemon {
    child: Child,
    root: PathBuf,
}

impl Daemon {
    pub fn start(project: &Project, model_base_url: &str) -> Self {
        let child = Command::new(cargo_bin("lfd"))
            .arg("--root")
            .arg(project.root())
            .arg("--worker-binary")
            .arg(cargo_bin("lf-worker"))
            .env("LF_MODEL_BASE_URL", model_base_url)
            .env("RUST_LOG", "warn")
            .spawn()
            .expect("spawn lfd");

        let daemon = Self { child, root: project.root().to_path_buf() };
        daemon.wait_for_socket();
        daemon
    }

    fn wait_for_socket(&self) {
        let socket = self.root.join("run").join("lfd.sock");
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if socket.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("lfd never bound its control socket at {}", socket.display());
    }

    pub fn lfctl(&self) -> Command {
        let mut cmd = Command::new(cargo_bin("lfctl"));
        cmd.arg("--root").arg(&self.root);
        cmd
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Stands in for the Gemini `generateContent` endpoint: replies to every
/// request with the next response text off a queue, repeating the last
/// one once the queue runs dry so a stray extra request doesn't hang.
pub struct FakeModelServer {
    base_url: String,
}

impl FakeModelServer {
    pub fn start(responses: Vec<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake model server");
        let addr = listener.local_addr().unwrap();
        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(responses.into_iter().map(str::to_string).collect()));

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || serve_one(stream, &queue));
            }
        });

        Self { base_url: format!("http://{addr}") }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn serve_one(mut stream: TcpStream, queue: &Mutex<VecDeque<String>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut content_length = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_string) {
            content_length = value.parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let text = {
        let mut queue = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = queue.pop_front().unwrap_or_else(|| "<<LEVEL_1>>".to_string());
        queue.push_back(next.clone());
        next
    };
    let reply = serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
    .to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.len(),
        reply
    );
    let _ = stream.write_all(response.as_bytes());
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
