/*!
Stub HTTP /ping pour tester les collecteurs sans vrai serveur ClickHouse

Petit serveur axum sur 127.0.0.1 (port éphémère). Un middleware enregistre
chaque ligne de requête, le handler /ping répond selon le comportement
configuré : sain, corps arbitraire, statut d'erreur ou requête qui ne répond
jamais.
*/

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum StubBehavior {
    /// 200 + "Ok.\n", la réponse d'un ClickHouse sain
    Healthy,
    /// 200 + corps arbitraire
    Body(String),
    /// Statut HTTP donné, corps vide
    Status(u16),
    /// Accepte la requête puis ne répond jamais
    Hang,
}

#[derive(Clone)]
struct StubState {
    behavior: Arc<Mutex<StubBehavior>>,
    requests: Arc<Mutex<Vec<String>>>,
}

pub struct PingStub {
    port: u16,
    state: StubState,
    handle: JoinHandle<()>,
}

impl PingStub {
    pub async fn start(behavior: StubBehavior) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = StubState {
            behavior: Arc::new(Mutex::new(behavior)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/ping", any(ping))
            .layer(middleware::from_fn_with_state(state.clone(), record_request))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::debug!("[stub] server error: {}", e);
            }
        });

        log::info!("🧪 [STUB] /ping listening on 127.0.0.1:{}", port);
        Ok(Self { port, state, handle })
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Lignes de requête reçues, ex: "GET /ping HTTP/1.1"
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

impl Drop for PingStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record_request(State(state): State<StubState>, req: Request, next: Next) -> Response {
    let line = format!("{} {} {:?}", req.method(), req.uri(), req.version());
    state.requests.lock().unwrap().push(line);
    next.run(req).await
}

async fn ping(State(state): State<StubState>) -> Response {
    let current = state.behavior.lock().unwrap().clone();
    let text_plain = [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")];
    match current {
        StubBehavior::Healthy => (StatusCode::OK, text_plain, "Ok.\n".to_string()).into_response(),
        StubBehavior::Body(body) => (StatusCode::OK, text_plain, body).into_response(),
        StubBehavior::Status(code) => StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response(),
        StubBehavior::Hang => std::future::pending::<Response>().await,
    }
}

/// Port local sur lequel plus personne n'écoute (connexion refusée)
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn raw_get(port: u16) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_stub_answers_and_records() {
        let stub = PingStub::start(StubBehavior::Healthy).await.unwrap();
        let response = raw_get(stub.port()).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("\r\n\r\nOk.\n"));
        assert_eq!(stub.requests(), vec!["GET /ping HTTP/1.1".to_string()]);

        stub.set_behavior(StubBehavior::Status(503));
        assert!(raw_get(stub.port()).await.starts_with("HTTP/1.1 503"));
        assert_eq!(stub.request_count(), 2);
    }

    #[tokio::test]
    async fn test_hang_never_answers() {
        let stub = PingStub::start(StubBehavior::Hang).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(200), raw_get(stub.port())).await;
        assert!(pending.is_err());
        assert_eq!(stub.request_count(), 1);
    }
}
