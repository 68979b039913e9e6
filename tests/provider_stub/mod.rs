use std::io::Read as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use serde_json::Value;

pub const STABILITY_PATH: &str = "/v1/generation/stub-engine/text-to-image";

#[derive(Debug, Clone, Default)]
pub struct ProviderStubConfig {
    /// Image requests answered with 503 before images start succeeding.
    pub image_failures: usize,
    /// Spoken effect text the speech endpoint rejects.
    pub failing_effect_text: Option<String>,
    /// Answer the full-story prompt with an API error.
    pub fail_full_story: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
}

pub struct ProviderStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProviderStub {
    pub fn spawn(config: ProviderStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start provider stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let image_calls = AtomicUsize::new(0);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let mut raw = String::new();
                if request.method() != &tiny_http::Method::Post
                    || request.as_reader().read_to_string(&mut raw).is_err()
                {
                    let _ = request.respond(
                        tiny_http::Response::from_string("bad request").with_status_code(400),
                    );
                    continue;
                }
                let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                recorded.lock().unwrap().push(RecordedRequest {
                    path: path.clone(),
                    body: body.clone(),
                });

                let (status, content_type, payload) = if path == "/v1/messages" {
                    anthropic_response(&body, &config)
                } else if path == STABILITY_PATH {
                    let call = image_calls.fetch_add(1, Ordering::SeqCst);
                    if call < config.image_failures {
                        (503, "application/json", br#"{"message":"busy"}"#.to_vec())
                    } else {
                        let image = base64::engine::general_purpose::STANDARD.encode(b"stub-png");
                        let payload = serde_json::json!({
                            "artifacts": [{ "base64": image, "seed": body["seed"] }]
                        });
                        (200, "application/json", payload.to_string().into_bytes())
                    }
                } else if let Some(voice_id) = path.strip_prefix("/v1/text-to-speech/") {
                    let text = body["text"].as_str().unwrap_or_default();
                    if config.failing_effect_text.as_deref() == Some(text) {
                        (500, "text/plain", b"speech failed".to_vec())
                    } else {
                        (200, "audio/mpeg", format!("mp3:{voice_id}:{text}").into_bytes())
                    }
                } else {
                    (404, "text/plain", b"not found".to_vec())
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_data(payload)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path_prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path.starts_with(path_prefix))
            .count()
    }
}

impl Drop for ProviderStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn anthropic_response(body: &Value, config: &ProviderStubConfig) -> (u16, &'static str, Vec<u8>) {
    let prompt = body
        .pointer("/messages/0/content")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let text = if prompt.contains("Outline a 10-15 page story") {
        serde_json::json!({
            "title": "Mira and the Silver Compass",
            "theme": "courage",
            "targetPages": 3,
            "beginning": { "summary": "Mira finds the compass.", "keyEvents": [], "pageCount": 1 },
            "middle": { "summary": "The fog rolls in.", "keyEvents": [], "conflict": "The Fog King", "pageCount": 1 },
            "end": { "summary": "The ships come home.", "keyEvents": [], "resolution": "Light", "pageCount": 1 },
            "characters": [{ "name": "Mira", "role": "protagonist" }],
            "narrativeArc": "From fear to courage",
            "imageSeed": 5000
        })
    } else if prompt.contains("Write the complete") {
        if config.fail_full_story {
            let error = serde_json::json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "Overloaded" }
            });
            return (529, "application/json", error.to_string().into_bytes());
        }
        serde_json::json!({
            "title": "Mira and the Silver Compass",
            "imageSeed": 5000,
            "pages": [
                { "pageNumber": 1, "text": "Mira held the compass tight.", "imagePrompt": "girl with compass", "mood": "calm", "backgroundMusic": "journey", "soundEffects": ["door_creak"] },
                { "pageNumber": 2, "text": "The fog swallowed the harbor.", "imagePrompt": "foggy harbor", "mood": "scary", "backgroundMusic": "scary", "soundEffects": ["thunder_clap"] },
                { "pageNumber": 3, "text": "The ships sailed home at last.", "imagePrompt": "ships at dawn", "mood": "happy", "backgroundMusic": "awesome" }
            ]
        })
    } else {
        return (400, "text/plain", b"unknown prompt".to_vec());
    };

    let fenced = format!("Here is your story:\n```json\n{text}\n```\n");
    let payload = serde_json::json!({
        "id": "msg_stub",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": fenced }],
        "model": body["model"],
    });
    (200, "application/json", payload.to_string().into_bytes())
}
