use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::ring::{HashRing, REPLICAS};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no backend nodes registered")]
    NoNodes,

    #[error("count {expected} does not match the {actual} hostnames supplied")]
    CountMismatch { expected: usize, actual: usize },

    #[error("hostname {0} is already registered")]
    DuplicateNode(String),

    #[error("hostnames must be non-empty")]
    EmptyHostname,
}

impl RouterError {
    fn status(&self) -> StatusCode {
        match self {
            RouterError::NoNodes => StatusCode::SERVICE_UNAVAILABLE,
            RouterError::CountMismatch { .. }
            | RouterError::DuplicateNode(_)
            | RouterError::EmptyHostname => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "message": self.to_string(),
            "status": "failure",
        }));
        (self.status(), body).into_response()
    }
}

/// Shared router state injected into every handler.
///
/// The ring sits behind one coarse lock; all three ring operations are
/// O(ring size), so handlers hold the lock briefly.
#[derive(Clone)]
pub struct RouterState {
    ring: Arc<Mutex<HashRing>>,
}

impl RouterState {
    pub fn new(ring: HashRing) -> Self {
        RouterState {
            ring: Arc::new(Mutex::new(ring)),
        }
    }
}

#[derive(Debug, Serialize)]
struct Banner {
    service: &'static str,
    version: &'static str,
    host: String,
}

#[derive(Debug, Deserialize)]
struct HomeParams {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RouteReply {
    message: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct RingReport {
    slots: u64,
    replicas: usize,
    entries: usize,
    nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RepReply {
    message: RingReport,
    status: &'static str,
}

/// Membership change request for `/add` and `/rm`. The declared count must
/// match the hostname list length.
#[derive(Debug, Deserialize)]
struct MembershipChange {
    n: usize,
    hostnames: Vec<String>,
}

async fn root() -> Json<Banner> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    Json(Banner {
        service: "ringroute",
        version: env!("CARGO_PKG_VERSION"),
        host,
    })
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// Report which backend would serve the request key.
///
/// A numeric `id` is taken as the pre-hashed key; anything else is mapped
/// onto the ring with the digest convention replica placement uses.
async fn home(
    State(state): State<RouterState>,
    Query(params): Query<HomeParams>,
) -> Result<Json<RouteReply>, RouterError> {
    let ring = state.ring.lock().unwrap();
    let id = params.id.unwrap_or_default();
    let key = match id.parse::<u64>() {
        Ok(n) => n,
        Err(_) => ring.key_slot(id.as_bytes()),
    };
    let node = ring.resolve(key).ok_or(RouterError::NoNodes)?;
    Ok(Json(RouteReply {
        message: format!("Hello from server: {node}"),
        status: "successful",
    }))
}

async fn rep(State(state): State<RouterState>) -> Json<RepReply> {
    let ring = state.ring.lock().unwrap();
    Json(rep_reply(&ring))
}

async fn add_nodes(
    State(state): State<RouterState>,
    Json(req): Json<MembershipChange>,
) -> Result<Json<RepReply>, RouterError> {
    if req.n != req.hostnames.len() {
        return Err(RouterError::CountMismatch {
            expected: req.n,
            actual: req.hostnames.len(),
        });
    }

    let mut ring = state.ring.lock().unwrap();

    // Validate the whole batch before mutating, so a rejected request
    // leaves the ring untouched.
    let mut seen = HashSet::new();
    for host in &req.hostnames {
        if host.is_empty() {
            return Err(RouterError::EmptyHostname);
        }
        if ring.contains(host) || !seen.insert(host.as_str()) {
            return Err(RouterError::DuplicateNode(host.clone()));
        }
    }

    for host in req.hostnames {
        info!(node = %host, "adding backend to ring");
        ring.add_node(host);
    }

    Ok(Json(rep_reply(&ring)))
}

async fn remove_nodes(
    State(state): State<RouterState>,
    Json(req): Json<MembershipChange>,
) -> Result<Json<RepReply>, RouterError> {
    if req.n != req.hostnames.len() {
        return Err(RouterError::CountMismatch {
            expected: req.n,
            actual: req.hostnames.len(),
        });
    }

    let mut ring = state.ring.lock().unwrap();
    for host in &req.hostnames {
        if !ring.contains(host) {
            warn!(node = %host, "removing a backend that is not on the ring");
        }
        info!(node = %host, "removing backend from ring");
        ring.remove_node(host);
    }

    Ok(Json(rep_reply(&ring)))
}

fn rep_reply(ring: &HashRing) -> RepReply {
    RepReply {
        message: RingReport {
            slots: ring.slots(),
            replicas: REPLICAS,
            entries: ring.len(),
            nodes: ring.nodes(),
        },
        status: "successful",
    }
}

/// Assemble the router. Exposed separately from [`serve`] so tests can drive
/// it in process.
pub fn app(state: RouterState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/heartbeat", get(heartbeat))
        .route("/home", get(home))
        .route("/rep", get(rep))
        .route("/add", post(add_nodes))
        .route("/rm", delete(remove_nodes))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: RouterState) -> anyhow::Result<()> {
    info!(%addr, "router listening");
    axum::Server::bind(&addr)
        .serve(app(state).into_make_service())
        .await?;
    Ok(())
}
