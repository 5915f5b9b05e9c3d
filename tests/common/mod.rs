#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use ipvec::embedding::{EmbedMode, EmbeddingProvider};
use ipvec::error::ProviderError;

/// Deterministic pseudo-embedding: FNV-1a of the text seeds each component.
pub fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (0..dims)
        .map(|i| {
            let h = hash.rotate_left((i * 7) as u32) ^ (i as u64).wrapping_mul(0x9e37_79b9);
            ((h % 2000) as f32 / 1000.0) - 1.0
        })
        .collect()
}

/// In-process provider for pipeline tests.
///
/// Texts containing `FAIL` are rejected and texts containing `DOWN` time
/// out, so a batch holding one fails as a whole and then item by item.
/// `down` makes every call unavailable. `batches` counts every call.
pub struct FakeProvider {
    pub dims: usize,
    pub batches: AtomicUsize,
    pub down: AtomicBool,
}

impl FakeProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            batches: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) || texts.iter().any(|t| t.contains("DOWN")) {
            return Err(ProviderError::Unavailable("timed out".into()));
        }
        if texts.iter().any(|t| t.contains("FAIL")) {
            return Err(ProviderError::Rejected {
                status: 400,
                body: "invalid input".into(),
            });
        }
        Ok(texts.iter().map(|t| fake_vector(t, self.dims)).collect())
    }
}

/// Minimal OpenAI-style embeddings endpoint on a std `TcpListener`.
///
/// Inputs steer the response: `REJECT` → 400, `MALFORMED` → 200 without
/// vectors, `SLOW` → stall past the client timeout. `fail_next(n)` answers
/// the next `n` requests with 503.
pub struct FakeEmbeddingServer {
    pub url: String,
    pub requests: Arc<AtomicUsize>,
    pub models: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicUsize>,
}

impl FakeEmbeddingServer {
    pub fn start(dims: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let models = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(AtomicUsize::new(0));

        let (r, m, f) = (requests.clone(), models.clone(), failing.clone());
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let (r, m, f) = (r.clone(), m.clone(), f.clone());
                thread::spawn(move || handle(stream, dims, &r, &m, &f));
            }
        });

        Self {
            url: format!("http://{}/v1/embeddings", addr),
            requests,
            models,
            failing,
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failing.store(n, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn handle(
    stream: TcpStream,
    dims: usize,
    requests: &AtomicUsize,
    models: &Mutex<Vec<String>>,
    failing: &AtomicUsize,
) {
    let mut reader = BufReader::new(stream);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    requests.fetch_add(1, Ordering::SeqCst);

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let model = request["model"].as_str().unwrap_or_default().to_string();
    models.lock().unwrap().push(model.clone());
    let inputs: Vec<String> = request["input"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let (status, payload) = if failing
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        ("503 Service Unavailable", json!({"error": "overloaded"}))
    } else if inputs.iter().any(|t| t.contains("SLOW")) {
        thread::sleep(Duration::from_millis(2500));
        return;
    } else if inputs.iter().any(|t| t.contains("REJECT")) {
        ("400 Bad Request", json!({"error": "invalid input"}))
    } else if inputs.iter().any(|t| t.contains("MALFORMED")) {
        ("200 OK", json!({"object": "list", "data": []}))
    } else {
        let data: Vec<Value> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"object": "embedding", "index": i, "embedding": fake_vector(t, dims)}))
            .collect();
        ("200 OK", json!({"object": "list", "model": model, "data": data}))
    };

    let body = payload.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Write `items` as a JSON array at `base/rel`.
pub fn write_json(base: &Path, rel: &str, items: &Value) {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(items).unwrap()).unwrap();
}
