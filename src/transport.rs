//! Delivery seams between agents.
//!
//! [`Dispatch`] is an agent's inbound face: it receives one validated
//! envelope and produces one [`RpcResponse`]. [`Transport`] is the outbound
//! side: it carries an envelope to a callback address and brings the response
//! back. Two transports are provided, an in-process [`LocalTransport`] used
//! by the simulation and the tests, and an [`HttpTransport`] posting JSON to
//! `http://{endpoint}/rpc` for agents living in other processes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::protocol::{Envelope, RpcResponse, RPC_PATH};
use crate::rpc_client::CallError;

/// An agent's inbound message handler.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Handles one inbound envelope and produces the response object.
    async fn dispatch(&self, envelope: Envelope) -> RpcResponse;
}

/// Carries envelopes to callback addresses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `envelope` to `target` and returns the peer's response.
    ///
    /// Implementations do not enforce deadlines; the RPC client wraps every
    /// delivery in its own timeout.
    async fn deliver(&self, target: &str, envelope: &Envelope) -> Result<RpcResponse, CallError>;
}

/// In-process endpoint table mapping callback addresses to handlers.
///
/// Delivery to an unbound endpoint behaves like a refused connection, so
/// retry and technical-loss paths exercise the same way they would over a
/// real network.
#[derive(Default)]
pub struct LocalTransport {
    endpoints: RwLock<HashMap<String, Arc<dyn Dispatch>>>,
}

impl LocalTransport {
    /// Creates an empty endpoint table.
    pub fn new() -> Arc<LocalTransport> {
        Arc::new(LocalTransport::default())
    }

    /// Binds `dispatch` to `endpoint`, replacing any previous binding.
    pub async fn bind(&self, endpoint: impl Into<String>, dispatch: Arc<dyn Dispatch>) {
        self.endpoints.write().await.insert(endpoint.into(), dispatch);
    }

    /// Removes an endpoint, simulating an agent going away.
    pub async fn unbind(&self, endpoint: &str) {
        self.endpoints.write().await.remove(endpoint);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(&self, target: &str, envelope: &Envelope) -> Result<RpcResponse, CallError> {
        let handler = self.endpoints.read().await.get(target).cloned();
        match handler {
            Some(handler) => Ok(handler.dispatch(envelope.clone()).await),
            None => Err(CallError::ConnectionRefused {
                target: target.to_owned(),
                detail: "no such endpoint".to_owned(),
            }),
        }
    }
}

/// HTTP transport posting the envelope as a JSON body to the well-known path.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a shared connection pool.
    pub fn new() -> Arc<HttpTransport> {
        Arc::new(HttpTransport {
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, target: &str, envelope: &Envelope) -> Result<RpcResponse, CallError> {
        let url = format!("http://{target}{RPC_PATH}");
        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CallError::ConnectionRefused {
                        target: target.to_owned(),
                        detail: e.to_string(),
                    }
                } else if e.is_timeout() {
                    CallError::Timeout {
                        target: target.to_owned(),
                    }
                } else {
                    CallError::Unavailable {
                        target: target.to_owned(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CallError::Unavailable {
                target: target.to_owned(),
                detail: format!("http status {status}"),
            });
        }

        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| CallError::InvalidResponse(crate::protocol::ValidationError::Syntax(
                e.to_string(),
            )))
    }
}
