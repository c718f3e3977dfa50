//! HTTP face of an agent.
//!
//! Exposes a [`Dispatch`] implementation at `POST /rpc`, the well-known path
//! every agent serves. The body is validated before dispatch; protocol
//! rejections come back as [`RpcResponse`] error objects with HTTP 200, so
//! callers always parse one response shape.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::debug;

use crate::protocol::{validate, RpcResponse, RPC_PATH};
use crate::transport::Dispatch;

/// Builds the router serving `dispatch` on the well-known RPC path.
pub fn router(dispatch: Arc<dyn Dispatch>) -> Router {
    Router::new().route(RPC_PATH, post(handle)).with_state(dispatch)
}

/// Serves `dispatch` on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, dispatch: Arc<dyn Dispatch>) -> std::io::Result<()> {
    debug!(addr = ?listener.local_addr(), "rpc endpoint listening");
    axum::serve(listener, router(dispatch)).await
}

async fn handle(State(dispatch): State<Arc<dyn Dispatch>>, body: String) -> Json<RpcResponse> {
    match validate(&body) {
        Ok(envelope) => Json(dispatch.dispatch(envelope).await),
        Err(error) => {
            debug!(error = %error, "rejecting invalid envelope");
            Json(RpcResponse::fail(error.code(), error.to_string()))
        }
    }
}
