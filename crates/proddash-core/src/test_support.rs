use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, sleep};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::http::{ApiClient, ApiRequest, ApiResponse, AuthRedirect, CredentialSource, Transport};
use crate::session::{SessionCell, SessionStore};
use crate::storage::MemoryStorage;

type Scripted = (Option<Duration>, Result<Value, TransportError>);

#[derive(Default)]
struct StubState {
    queue: VecDeque<Scripted>,
    requests: Vec<ApiRequest>,
    issued_at: Vec<Instant>,
}

/// Replays queued responses in order and records every request it sees.
#[derive(Clone, Default)]
pub(crate) struct StubTransport {
    state: Arc<Mutex<StubState>>,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_ok(&self, body: Value) {
        self.state.lock().queue.push_back((None, Ok(body)));
    }

    pub(crate) fn push_err(&self, err: TransportError) {
        self.state.lock().queue.push_back((None, Err(err)));
    }

    pub(crate) fn push_delayed(&self, delay: Duration, result: Result<Value, TransportError>) {
        self.state.lock().queue.push_back((Some(delay), result));
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub(crate) fn issued_at(&self) -> Vec<Instant> {
        self.state.lock().issued_at.clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let next = {
            let mut state = self.state.lock();
            state.requests.push(request);
            state.issued_at.push(Instant::now());
            state.queue.pop_front()
        };
        let Some((delay, result)) = next else {
            return Err(TransportError::Network(
                "stub transport has no more queued responses".to_string(),
            ));
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        result.map(|body| ApiResponse { status: 200, body })
    }
}

#[derive(Debug, Default)]
pub(crate) struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl CredentialSource for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn revoke(&self) {
        *self.token.lock() = None;
    }
}

#[derive(Debug, Default)]
pub(crate) struct CountingRedirect {
    hits: AtomicUsize,
}

impl CountingRedirect {
    pub(crate) fn count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl AuthRedirect for CountingRedirect {
    fn redirect_to_login(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn client_with(
    transport: &StubTransport,
    token: Option<&str>,
) -> (ApiClient, Arc<StaticCredentials>, Arc<CountingRedirect>) {
    let credentials = Arc::new(StaticCredentials {
        token: Mutex::new(token.map(str::to_string)),
    });
    let redirect = Arc::new(CountingRedirect::default());
    let client = ApiClient::new(
        Arc::new(transport.clone()),
        &ClientConfig::default(),
        credentials.clone(),
        redirect.clone(),
    );
    (client, credentials, redirect)
}

pub(crate) fn session_with(
    transport: &StubTransport,
    storage: Arc<MemoryStorage>,
) -> (SessionStore, Arc<CountingRedirect>) {
    let cell = Arc::new(SessionCell::new(storage));
    let redirect = Arc::new(CountingRedirect::default());
    let client = ApiClient::new(
        Arc::new(transport.clone()),
        &ClientConfig::default(),
        cell.clone(),
        redirect.clone(),
    );
    (SessionStore::new(Arc::new(client), cell), redirect)
}

pub(crate) fn server_error() -> TransportError {
    TransportError::Status {
        status: 500,
        body: None,
    }
}

pub(crate) fn status_error(status: u16, body: Value) -> TransportError {
    TransportError::Status {
        status,
        body: Some(body),
    }
}
