#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use mods_registry::manifest::ManifestFile;
use mods_registry::net::{NetworkFailure, Reply, Response, Transport};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Step {
    Answer {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Fail(NetworkFailure),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Self::Answer {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::status(302).header("location", location)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Self::Answer { headers, .. } = &mut self {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn body(mut self, bytes: &[u8]) -> Self {
        if let Self::Answer { body, .. } = &mut self {
            *body = bytes.to_vec();
        }
        self
    }

    pub fn timeout() -> Self {
        Self::Fail(NetworkFailure::Timeout(std::time::Duration::from_secs(30)))
    }
}

/// A recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub range: Option<String>,
}

/// In-memory transport answering from per-URL queues
///
/// Each request pops the next step for its method and URL; the last step
/// repeats once the queue is down to one. Unscripted URLs fail to connect.
#[derive(Default)]
pub struct ScriptedTransport {
    heads: Mutex<HashMap<String, VecDeque<Step>>>,
    gets: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_head(self, url: &str, step: Step) -> Self {
        self.heads
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn on_get(self, url: &str, step: Step) -> Self {
        self.gets
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .count()
    }

    fn next(queues: &Mutex<HashMap<String, VecDeque<Step>>>, url: &str) -> Step {
        let mut queues = queues.lock().unwrap();
        match queues.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Step::Fail(NetworkFailure::Connection(format!("no route to {url}"))),
        }
    }

    fn record(&self, method: &'static str, url: &str, range: Option<&str>) {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            range: range.map(str::to_string),
        });
    }
}

fn reply_of(url: &str, status: u16, headers: &[(String, String)]) -> Reply {
    headers
        .iter()
        .fold(Reply::new(url, status), |reply, (name, value)| {
            reply.with_header(name, value.clone())
        })
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn head(&self, url: &str) -> Result<Reply, NetworkFailure> {
        self.record("HEAD", url, None);
        match Self::next(&self.heads, url) {
            Step::Answer {
                status, headers, ..
            } => Ok(reply_of(url, status, &headers)),
            Step::Fail(failure) => Err(failure),
        }
    }

    async fn get(&self, url: &str, range: Option<&str>) -> Result<Response, NetworkFailure> {
        self.record("GET", url, range);
        match Self::next(&self.gets, url) {
            Step::Answer {
                status,
                headers,
                body,
            } => Ok(Response {
                reply: reply_of(url, status, &headers),
                body: Box::pin(stream::iter(vec![Ok::<_, NetworkFailure>(Bytes::from(body))])),
            }),
            Step::Fail(failure) => Err(failure),
        }
    }
}

/// Write a manifest under `root` and read it back
pub fn write_manifest(root: &Path, rel: &str, content: &str) -> ManifestFile {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    ManifestFile::read(&path).unwrap()
}

pub fn reread(file: &ManifestFile) -> String {
    fs::read_to_string(&file.path).unwrap()
}

/// A VAE manifest with a single file descriptor
pub fn vae_yaml(id: &str, url: &str, sha256: &str, size: u64) -> String {
    format!(
        "id: {id}\nname: {id}\ntype: vae\nfile:\n  url: {url}\n  sha256: \"{sha256}\"\n  size: {size}\n"
    )
}

/// A checkpoint manifest with one `fp16` variant
pub fn checkpoint_yaml(id: &str, url: &str, sha256: &str, size: u64) -> String {
    format!(
        "id: {id}\nname: {id}\ntype: checkpoint\nvariants:\n  - id: fp16\n    file: {id}.safetensors\n    url: {url}\n    sha256: \"{sha256}\"\n    size: {size}\n"
    )
}

/// Minimal HTTP/1.1 server answering fixed routes by path
///
/// Returns the base URL. Unknown paths get 404. Each connection serves one
/// request and is closed.
pub async fn serve(routes: Vec<(&str, u16, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes: HashMap<String, (u16, Vec<u8>)> = routes
        .into_iter()
        .map(|(path, status, body)| (path.to_string(), (status, body)))
        .collect();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request: Vec<u8> = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = String::from_utf8_lossy(&request);
                let mut parts = head.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let (status, body) = routes
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, b"not found".to_vec()));
                let header = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                if method != "HEAD" {
                    let _ = socket.write_all(&body).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

pub fn paths(files: &[ManifestFile]) -> Vec<PathBuf> {
    files.iter().map(|f| f.path.clone()).collect()
}
