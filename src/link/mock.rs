//! In-process engine stand-in for tests: accepts WebSocket connections on a
//! loopback port and answers each JSON request through a responder closure.
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

pub enum MockReply {
    Send(Value),
    /// Several frames, in order (e.g. a stray response before the real one)
    SendAll(Vec<Value>),
    Silent,
    /// Drop the TCP stream without a close handshake
    Drop,
    Close(u16, String),
}

impl MockReply {
    pub fn ok(request: &Value, data: Value) -> Self {
        MockReply::Send(json!({
            "success": true,
            "sourceMessageId": request["messageId"],
            "data": data,
        }))
    }

    pub fn fail(request: &Value, error_info: &str) -> Self {
        MockReply::Send(json!({
            "success": false,
            "sourceMessageId": request["messageId"],
            "errorInfo": error_info,
        }))
    }
}

type Responder = Arc<dyn Fn(&Value) -> MockReply + Send + Sync>;

pub struct MockEngine {
    pub url: String,
    /// Every request received, across all connections
    pub requests: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl MockEngine {
    pub async fn spawn(responder: impl Fn(&Value) -> MockReply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let responder: Responder = Arc::new(responder);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let responder = responder.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let Message::Text(text) = msg else {
                            continue;
                        };
                        let request: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                        log.lock().unwrap().push(request.clone());
                        match responder(&request) {
                            MockReply::Send(value) => {
                                let _ = ws.send(Message::Text(value.to_string())).await;
                            }
                            MockReply::SendAll(values) => {
                                for value in values {
                                    let _ = ws.send(Message::Text(value.to_string())).await;
                                }
                            }
                            MockReply::Silent => {}
                            MockReply::Drop => return,
                            MockReply::Close(code, reason) => {
                                let frame = CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: reason.into(),
                                };
                                let _ = ws.close(Some(frame)).await;
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            requests,
            task,
        }
    }

    pub fn requests_of(&self, kind: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["$type"] == kind)
            .cloned()
            .collect()
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}
