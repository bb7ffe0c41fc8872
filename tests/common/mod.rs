#![allow(dead_code)]

use async_trait::async_trait;
use ollama_chat::error::ChatError;
use ollama_chat::llm::{
    create_streaming_response,
    Backend,
    ChatRequest,
    ChatTransport,
    FragmentStream,
    ModelDirectory,
};
use std::collections::{ HashMap, VecDeque };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::net::{ TcpListener, TcpStream };
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Step {
    Fragment(&'static str),
    Fail(ChatError),
    /// Keep the stream open until the turn is cancelled.
    WaitForCancel,
}

/// Plays back one script per `send`, in order. An exhausted script ends the
/// stream normally.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(
        &self,
        request: ChatRequest,
        cancel: CancellationToken
    ) -> Result<FragmentStream, ChatError> {
        request.validate()?;
        self.requests.lock().unwrap().push(request);
        self.tokens.lock().unwrap().push(cancel.clone());
        let steps = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        Ok(
            create_streaming_response(move |tx| async move {
                for step in steps {
                    match step {
                        Step::Fragment(text) => {
                            if tx.send(Ok(text.to_string())).await.is_err() {
                                return;
                            }
                        }
                        Step::Fail(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                        Step::WaitForCancel => {
                            cancel.cancelled().await;
                            return;
                        }
                    }
                }
            })
        )
    }

    fn describe(&self) -> String {
        "scripted transport".into()
    }
}

pub struct FakeDirectory {
    pub models: Result<Vec<String>, ChatError>,
}

impl FakeDirectory {
    pub fn with(models: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            models: Ok(models.iter().map(|m| m.to_string()).collect()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            models: Err(ChatError::Connectivity {
                url: "http://localhost:11434".into(),
                message: "connection refused".into(),
            }),
        })
    }
}

#[async_trait]
impl ModelDirectory for FakeDirectory {
    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        self.models.clone()
    }

    async fn check_connection(&self) -> Result<String, ChatError> {
        self.models.clone().map(|_| "0.0.0-test".to_string())
    }
}

pub fn scripted_backend(transport: Arc<ScriptedTransport>, directory: Arc<FakeDirectory>) -> Backend {
    Backend { transport, directory }
}

// ---------------------------------------------------------------------------
// Local stand-in for the Ollama daemon
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Reply {
    /// 200 with the given body pieces written one by one, then close.
    Chunks(Vec<String>),
    /// 200 with the given pieces, then keep the socket open until the client leaves.
    ChunksThenHold(Vec<String>),
    Json(u16, String),
}

pub struct MockOllama {
    pub url: String,
    pub bodies: Arc<Mutex<Vec<String>>>,
    pub client_closed: Arc<Notify>,
}

impl MockOllama {
    pub async fn start(routes: Vec<(&'static str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let routes: Arc<HashMap<&'static str, Reply>> = Arc::new(routes.into_iter().collect());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let client_closed = Arc::new(Notify::new());

        let (bodies_c, closed_c) = (bodies.clone(), client_closed.clone());
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let (routes, bodies, closed) = (routes.clone(), bodies_c.clone(), closed_c.clone());
                tokio::spawn(async move {
                    handle_connection(socket, routes, bodies, closed).await;
                });
            }
        });

        Self { url, bodies, client_closed }
    }

    pub fn last_body(&self) -> serde_json::Value {
        let bodies = self.bodies.lock().unwrap();
        serde_json::from_str(bodies.last().expect("no request body recorded")).unwrap()
    }
}

/// A port nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn chat_line(content: &str, done: bool) -> String {
    serde_json::json!({
        "model": "llama3.2",
        "created_at": "2024-06-01T12:00:00Z",
        "message": { "role": "assistant", "content": content },
        "done": done
    }).to_string() + "\n"
}

async fn handle_connection(
    mut socket: TcpStream,
    routes: Arc<HashMap<&'static str, Reply>>,
    bodies: Arc<Mutex<Vec<String>>>,
    closed: Arc<Notify>
) {
    let Some((path, body)) = read_request(&mut socket).await else {
        return;
    };
    if !body.is_empty() {
        bodies.lock().unwrap().push(body);
    }

    let reply = routes
        .get(path.as_str())
        .cloned()
        .unwrap_or_else(|| Reply::Json(404, r#"{"error":"not found"}"#.into()));

    match reply {
        Reply::Json(status, body) => {
            let head = format!(
                "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Chunks(pieces) => {
            write_stream_head(&mut socket).await;
            for piece in pieces {
                let _ = socket.write_all(piece.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = socket.shutdown().await;
        }
        Reply::ChunksThenHold(pieces) => {
            write_stream_head(&mut socket).await;
            for piece in pieces {
                let _ = socket.write_all(piece.as_bytes()).await;
                let _ = socket.flush().await;
            }
            let mut buf = [0u8; 64];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => {
                        closed.notify_one();
                        return;
                    }
                    Ok(_) => {}
                }
            }
        }
    }
}

async fn write_stream_head(socket: &mut TcpStream) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n";
    let _ = socket.write_all(head.as_bytes()).await;
}

async fn read_request(socket: &mut TcpStream) -> Option<(String, String)> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let path = head.split_whitespace().nth(1)?.to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&data[header_end..]).to_string();
    Some((path, body))
}
