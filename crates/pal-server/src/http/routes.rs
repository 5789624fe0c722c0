use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use pal_services::Services;
use pal_store::queries;
use pal_types::{BusEvent, Error, EscalationStatus, EventKind, PortStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiError;
use super::sse::events_stream;

type ApiResult = Result<Json<Value>, ApiError>;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/tree", get(sessions_tree))
        .route("/sessions/hierarchy/:id", get(session_hierarchy))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/events", get(session_events))
        .route("/ports", get(list_ports))
        .route("/ports/flow", get(ports_flow))
        .route("/ports/progress", get(ports_progress))
        .route("/ports/:id", get(get_port))
        .route("/orchestrations", get(list_orchestrations))
        .route("/orchestrations/:id", get(get_orchestration))
        .route("/orchestrations/:id/stats", get(orchestration_stats))
        .route("/attention/:session_id", get(get_attention))
        .route("/attention/:session_id/report", get(attention_report))
        .route("/attention/:session_id/history", get(attention_history))
        .route("/escalations", get(list_escalations))
        .route("/events/emit", post(emit_event))
        .route("/events", get(events_stream))
        .with_state(services)
}

/// Bind and serve until the process is stopped.
pub async fn serve_http(services: Services, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "push server listening");
    axum::serve(listener, router(services)).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    active: bool,
    limit: Option<usize>,
    status: Option<String>,
    session: Option<String>,
}

fn to_json<T: serde::Serialize>(value: T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| ApiError(Error::internal(e.to_string())))
}

async fn list_sessions(
    State(services): State<Services>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let sessions = services
        .sessions()
        .list(query.active, query.limit.unwrap_or(100))?;
    to_json(sessions)
}

async fn get_session(State(services): State<Services>, Path(id): Path<String>) -> ApiResult {
    let session = services.sessions().get(&id)?;
    let attention = services.attention().report(&id).ok();
    to_json(json!({ "session": session, "attention": attention }))
}

async fn session_events(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    // 404 on unknown ids rather than an empty log
    services.sessions().get(&id)?;
    let events = services.sessions().events(&id, query.limit)?;
    to_json(events)
}

async fn sessions_tree(State(services): State<Services>) -> ApiResult {
    let mut trees = Vec::new();
    for root in services.sessions().roots(50)? {
        trees.push(services.sessions().tree(&root.id)?);
    }
    to_json(trees)
}

async fn session_hierarchy(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult {
    let session = services.sessions().get(&id)?;
    let tree = services.sessions().tree(&session.root_session_id)?;
    to_json(tree)
}

async fn list_ports(
    State(services): State<Services>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = match &query.status {
        Some(raw) => Some(PortStatus::parse(raw).ok_or_else(|| {
            ApiError(Error::invalid_argument(format!(
                "unknown port status {:?}",
                raw
            )))
        })?),
        None => None,
    };
    let ports = services.ports().list(status, query.limit.unwrap_or(200))?;
    to_json(ports)
}

async fn get_port(State(services): State<Services>, Path(id): Path<String>) -> ApiResult {
    let port = services.ports().get(&id)?;
    let dependencies = services.ports().dependencies(&id)?;
    let inputs = services.handoffs().inputs(&id)?;
    to_json(json!({
        "port": port,
        "dependencies": dependencies,
        "handoffs": inputs,
    }))
}

/// Dependency edges for dashboard graph rendering, optionally narrowed to
/// the ports attributed to one session.
async fn ports_flow(
    State(services): State<Services>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let mut ports = services.ports().list(None, 500)?;
    if let Some(session) = &query.session {
        ports.retain(|p| p.session_id.as_deref() == Some(session.as_str()));
    }
    let edges = services
        .store()
        .read(queries::dependency::all_edges)
        .map_err(pal_types::Error::from)?;
    let ids: std::collections::HashSet<&str> = ports.iter().map(|p| p.id.as_str()).collect();
    let edges: Vec<Value> = edges
        .into_iter()
        .filter(|(port, dep)| ids.contains(port.as_str()) || ids.contains(dep.as_str()))
        .map(|(port, dep)| json!({ "port_id": port, "depends_on": dep }))
        .collect();
    to_json(json!({ "ports": ports, "edges": edges }))
}

async fn ports_progress(State(services): State<Services>) -> ApiResult {
    let counts = services.ports().summary()?;
    let total = counts.total();
    let percent = if total == 0 {
        0.0
    } else {
        counts.complete as f64 / total as f64 * 100.0
    };
    to_json(json!({ "counts": counts, "total": total, "percent": percent }))
}

async fn list_orchestrations(
    State(services): State<Services>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let orchestrations = services
        .store()
        .read(|conn| queries::orchestration::list(conn, query.limit.unwrap_or(50)))
        .map_err(pal_types::Error::from)?;
    to_json(orchestrations)
}

async fn get_orchestration(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult {
    let orchestration = services
        .store()
        .read(|conn| queries::orchestration::get(conn, &id))
        .map_err(pal_types::Error::from)?
        .ok_or_else(|| {
            ApiError(Error::not_found(format!("orchestration {} not found", id)).with_cause(&id))
        })?;
    to_json(orchestration)
}

async fn orchestration_stats(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult {
    let (orchestration, port_ids) = services
        .store()
        .read(|conn| {
            Ok((
                queries::orchestration::get(conn, &id)?,
                queries::orchestration::port_ids(conn, &id)?,
            ))
        })
        .map_err(pal_types::Error::from)?;
    let orchestration = orchestration.ok_or_else(|| {
        ApiError(Error::not_found(format!("orchestration {} not found", id)).with_cause(&id))
    })?;

    let mut ports = Vec::with_capacity(port_ids.len());
    for port_id in &port_ids {
        ports.push(services.ports().get(port_id)?);
    }
    let tokens: u64 = ports.iter().map(|p| p.input_tokens + p.output_tokens).sum();
    let cost: f64 = ports.iter().map(|p| p.cost).sum();

    to_json(json!({
        "orchestration": orchestration,
        "ports": ports,
        "total_tokens": tokens,
        "total_cost": cost,
    }))
}

async fn get_attention(
    State(services): State<Services>,
    Path(session_id): Path<String>,
) -> ApiResult {
    to_json(services.attention().get(&session_id)?)
}

async fn attention_report(
    State(services): State<Services>,
    Path(session_id): Path<String>,
) -> ApiResult {
    to_json(services.attention().report(&session_id)?)
}

async fn attention_history(
    State(services): State<Services>,
    Path(session_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    to_json(
        services
            .attention()
            .history(&session_id, query.limit.unwrap_or(50))?,
    )
}

async fn list_escalations(
    State(services): State<Services>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = match &query.status {
        Some(raw) => Some(EscalationStatus::parse(raw).ok_or_else(|| {
            ApiError(Error::invalid_argument(format!(
                "unknown escalation status {:?}",
                raw
            )))
        })?),
        None => None,
    };
    to_json(
        services
            .escalations()
            .list(status, query.limit.unwrap_or(100))?,
    )
}

#[derive(Debug, Deserialize)]
struct EmitBody {
    #[serde(rename = "type")]
    kind: String,
    session_id: Option<String>,
    port_id: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Development hook: publish an arbitrary event so dashboards and stream
/// consumers can be tested without driving real work.
async fn emit_event(
    State(services): State<Services>,
    Json(body): Json<EmitBody>,
) -> ApiResult {
    match EventKind::parse(&body.kind) {
        EventKind::Session(event_type) => match &body.session_id {
            Some(session_id) => {
                let id = services
                    .sessions()
                    .log_event(session_id, event_type, body.data.clone())?;
                to_json(json!({ "published": true, "event_id": id }))
            }
            None => Err(ApiError(Error::invalid_argument(
                "persisted event types need a session_id",
            ))),
        },
        other => {
            services.bus().publish_push(BusEvent {
                id: 0,
                session_id: body.session_id.clone(),
                port_id: body.port_id.clone(),
                kind: other,
                data: body.data.clone(),
                timestamp: chrono::Utc::now(),
            });
            to_json(json!({ "published": true }))
        }
    }
}
