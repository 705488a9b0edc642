//! JSON-RPC forwarding proxy that records submitted transactions.
//!
//! Every request is forwarded to the upstream node untouched. On devnet the
//! `send_transaction` calls passing through are saved to the transaction
//! store so they can be debugged later.

mod recorder;

pub use recorder::{tx_hash_of, Recorded, TransactionStore};

use crate::network::Network;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use ckb_types::H256;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;
const PORT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TRANSACTION: &str = "send_transaction";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("can't listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid json: {0}")]
    Decode(serde_json::Error),
    #[error("node returned transaction hash {returned:#x} but the request hashes to {computed:#x}")]
    HashMismatch { computed: H256, returned: H256 },
    #[error("proxy task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

struct ProxyState {
    client: reqwest::Client,
    upstream: String,
    network: Network,
    store: TransactionStore,
}

/// A proxy that is not listening.
#[derive(Clone)]
pub struct RpcProxy {
    state: Arc<ProxyState>,
}

/// A proxy accepting connections, [`RunningProxy::stop`] brings it back.
pub struct RunningProxy {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<io::Result<()>>,
    state: Arc<ProxyState>,
}

impl RpcProxy {
    pub fn new(upstream: &str, network: Network, store: TransactionStore) -> Self {
        Self::with_client(upstream, network, store, reqwest::Client::new())
    }

    pub fn with_client(
        upstream: &str,
        network: Network,
        store: TransactionStore,
        client: reqwest::Client,
    ) -> Self {
        let state = ProxyState {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
            network,
            store,
        };
        RpcProxy {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .fallback(forward)
            .with_state(self.state.clone())
    }

    pub async fn start(self, addr: SocketAddr) -> Result<RunningProxy, ProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let router = self.router();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    signal.await.ok();
                })
                .await
        });
        info!(
            "{} rpc proxy listening on {}, forwarding to {}",
            self.state.network, local_addr, self.state.upstream
        );
        Ok(RunningProxy {
            local_addr,
            shutdown,
            handle,
            state: self.state,
        })
    }
}

impl RunningProxy {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) -> Result<RpcProxy, ProxyError> {
        // the server may already be gone
        let _ = self.shutdown.send(());
        self.handle.await??;
        info!("rpc proxy on {} stopped", self.local_addr);
        Ok(RpcProxy { state: self.state })
    }
}

/// Whether something accepts TCP connections on `127.0.0.1:port`.
pub async fn is_port_listening(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PORT_CHECK_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// JSON-RPC calls in a body, single or batch. Anything else yields nothing.
fn parse_calls(body: &[u8]) -> Vec<Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(calls)) => calls,
        Ok(call @ Value::Object(_)) => vec![call],
        Ok(_) => Vec::new(),
        Err(err) => {
            debug!("request body is not json: {}", err);
            Vec::new()
        }
    }
}

fn id_key(value: &Value) -> String {
    value.get("id").map(Value::to_string).unwrap_or_default()
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_forwardable(name: &HeaderName) -> bool {
    name != header::HOST
        && name != header::CONTENT_LENGTH
        && !HOP_BY_HOP.contains(&name.as_str())
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if is_forwardable(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Record the `send_transaction` calls, returns the computed hash per request id.
fn record_sent(store: &TransactionStore, calls: &[Value]) -> HashMap<String, H256> {
    let mut sent = HashMap::new();
    for call in calls {
        if call.get("method").and_then(Value::as_str) != Some(SEND_TRANSACTION) {
            continue;
        }
        let tx = match call.get("params").and_then(|params| params.get(0)) {
            Some(tx) => tx,
            None => {
                warn!("{} without a transaction", SEND_TRANSACTION);
                continue;
            }
        };
        match store.record(tx) {
            Ok(Recorded::New(hash)) => {
                info!("recorded transaction {:#x}", hash);
                sent.insert(id_key(call), hash);
            }
            Ok(Recorded::Existing(hash)) => {
                debug!("transaction {:#x} already recorded", hash);
                sent.insert(id_key(call), hash);
            }
            Err(err) => warn!("can't record transaction: {}", err),
        }
    }
    sent
}

impl ProxyState {
    /// Record devnet transactions off the async workers.
    async fn record_calls(&self, calls: Vec<Value>) -> HashMap<String, H256> {
        if self.network != Network::Devnet || calls.is_empty() {
            return HashMap::new();
        }
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || record_sent(&store, &calls)).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!("record transactions: {}", err);
                HashMap::new()
            }
        }
    }

    fn inspect_response(&self, body: &[u8], sent: &HashMap<String, H256>) {
        for reply in parse_calls(body) {
            if let Some(err) = reply.get("error") {
                error!("rpc error response: {}", err);
                continue;
            }
            let computed = match sent.get(&id_key(&reply)) {
                Some(hash) => hash,
                None => continue,
            };
            let returned = reply
                .get("result")
                .cloned()
                .and_then(|result| serde_json::from_value::<H256>(result).ok());
            if let Some(returned) = returned {
                if &returned != computed {
                    let err = ProxyError::HashMismatch {
                        computed: computed.clone(),
                        returned,
                    };
                    error!("{}", err);
                }
            }
        }
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(err) => {
            warn!("read request body: {}", err);
            return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
        }
    };
    let sent = state.record_calls(parse_calls(&body)).await;

    let path = parts
        .uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");
    let mut headers = HeaderMap::new();
    copy_headers(&parts.headers, &mut headers);
    let upstream = state
        .client
        .request(parts.method, format!("{}{}", state.upstream, path))
        .headers(headers)
        .body(body)
        .send()
        .await;
    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(err) => {
            error!("forward to {}: {}", state.upstream, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Proxy error").into_response();
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("read response from {}: {}", state.upstream, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Proxy error").into_response();
        }
    };
    state.inspect_response(&bytes, &sent);

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    copy_headers(&upstream_headers, response.headers_mut());
    response
}
