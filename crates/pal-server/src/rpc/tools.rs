use pal_services::Services;
use pal_types::{Error, EscalationType, EventType, PortStatus, Result, Session, Severity};
use serde_json::{json, Value};

use super::dto::*;

/// The standard completion checklist handed to an agent when it starts a
/// port. The external verifier reports against these descriptions.
const DEFAULT_CHECKLIST: &[&str] = &[
    "build succeeds",
    "required tests pass",
    "no unresolved escalations",
];

/// Resolve the session a tool call acts on: explicit id first, then the
/// identity chain over the store. Never cached between calls.
pub fn resolve_session(services: &Services, explicit: Option<&str>) -> Result<Option<Session>> {
    match explicit {
        Some(id) => Ok(Some(services.sessions().get(id)?)),
        None => {
            let config = services.config();
            let project_root = config
                .project_root
                .as_ref()
                .map(|p| p.display().to_string());
            let cwd = std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string());
            services.sessions().find_active(
                None,
                None,
                cwd.as_deref(),
                project_root.as_deref(),
            )
        }
    }
}

pub fn handle_status(services: &Services, _args: StatusArgs) -> Result<Value> {
    let brief = |status: PortStatus| -> Result<Vec<PortBrief>> {
        Ok(services
            .ports()
            .list(Some(status), 50)?
            .into_iter()
            .map(|p| PortBrief {
                id: p.id,
                title: p.title,
                status: p.status.as_str().to_string(),
            })
            .collect())
    };

    let active_ports = brief(PortStatus::Running)?;
    let pending_ports = brief(PortStatus::Pending)?;
    let blocked = services.ports().list(Some(PortStatus::Blocked), 50)?;

    let mut suggestions = Vec::new();
    if active_ports.is_empty() {
        if let Some(next) = pending_ports.first() {
            suggestions.push(format!("start port {} with port_start", next.id));
        }
    }
    for port in &blocked {
        suggestions.push(format!(
            "port {} is blocked: {}",
            port.id,
            port.failure_summary.as_deref().unwrap_or("see escalations")
        ));
    }
    if suggestions.is_empty() {
        suggestions.push("all ports are flowing; keep going".to_string());
    }

    to_value(StatusResult {
        active_ports,
        pending_ports,
        suggestions,
    })
}

pub fn handle_port_start(services: &Services, args: PortStartArgs) -> Result<Value> {
    let session = resolve_session(services, args.session_id.as_deref())?;
    let session_id = session.as_ref().map(|s| s.id.as_str());

    // upsert: first sight of the id creates the port
    match services.ports().get(&args.id) {
        Ok(_) => {}
        Err(err) if err.kind() == pal_types::ErrorKind::NotFound => {
            let title = args.title.as_deref().or(args.description.as_deref());
            services.ports().create(&args.id, title, None, &[])?;
        }
        Err(err) => return Err(err),
    }

    let port = services.ports().start(&args.id, session_id)?;
    if let Some(session) = &session {
        services
            .attention()
            .set_port(&session.id, Some(&args.id))
            .ok();
    }

    let inputs = services.handoffs().inputs(&args.id)?;
    let message = if inputs.is_empty() {
        format!("port {} is running; no upstream handoffs", port.id)
    } else {
        format!(
            "port {} is running; {} upstream handoff(s) available via context",
            port.id,
            inputs.len()
        )
    };

    to_value(PortStartResult {
        port_id: port.id,
        status: "running".to_string(),
        message,
        checklist: DEFAULT_CHECKLIST.iter().map(|s| s.to_string()).collect(),
    })
}

pub fn handle_port_end(services: &Services, args: PortEndArgs) -> Result<Value> {
    let session = resolve_session(services, args.session_id.as_deref())?;
    let session_id = session.as_ref().map(|s| s.id.as_str());

    let checklist = args.checklist_result();
    let outcome = services.ports().complete(&args.id, &checklist, session_id)?;

    if let Some(summary) = &args.summary {
        if let Some(sid) = session_id {
            services
                .sessions()
                .log_event(sid, EventType::Decision, json!({ "text": summary }))?;
        }
    }

    let next_action = match outcome.status {
        PortStatus::Blocked => Some(format!(
            "fix the failing required items, then resolve escalation {} and call port_end again",
            outcome.escalation_id.unwrap_or_default()
        )),
        _ => None,
    };

    to_value(PortEndResult {
        port_id: outcome.port_id,
        status: outcome.status.as_str().to_string(),
        checklist,
        next_action,
        escalation_id: outcome.escalation_id,
    })
}

pub fn handle_checkpoint(services: &Services, args: CheckpointArgs) -> Result<Value> {
    let session = resolve_session(services, args.session_id.as_deref())?;

    match args.action.as_str() {
        "create" => {
            let session = session.ok_or_else(|| {
                Error::invalid_argument("checkpoint create needs an active session")
            })?;
            let checkpoint = match &args.summary {
                Some(summary) => {
                    services
                        .checkpoints()
                        .create_manual(&session.id, summary, &[], &[])?
                }
                None => services.checkpoints().create_auto(&session.id, "manual")?,
            };
            to_value(json!({
                "checkpoint_id": checkpoint.id,
                "summary": checkpoint.summary,
                "created_at": checkpoint.created_at,
            }))
        }
        "restore" => {
            let bundle = match args.id {
                Some(id) => services.checkpoints().build_restore_bundle(id)?,
                None => {
                    let session = session.ok_or_else(|| {
                        Error::invalid_argument("checkpoint restore needs an id or a session")
                    })?;
                    services.checkpoints().build_latest_bundle(&session.id)?
                }
            };
            to_value(bundle)
        }
        "list" => {
            let session = session.ok_or_else(|| {
                Error::invalid_argument("checkpoint list needs an active session")
            })?;
            let checkpoints = services.checkpoints().list(&session.id, 20)?;
            to_value(json!({ "checkpoints": checkpoints }))
        }
        other => Err(Error::invalid_argument(format!(
            "unknown checkpoint action {:?} (expected create, restore or list)",
            other
        ))),
    }
}

pub fn handle_escalate(services: &Services, args: EscalateArgs) -> Result<Value> {
    let escalation_type = EscalationType::parse(&args.escalation_type).ok_or_else(|| {
        Error::invalid_argument(format!(
            "unknown escalation type {:?}",
            args.escalation_type
        ))
    })?;
    let severity = match &args.severity {
        Some(raw) => Severity::parse(raw)
            .ok_or_else(|| Error::invalid_argument(format!("unknown severity {:?}", raw)))?,
        None => Severity::Medium,
    };

    let session = resolve_session(services, args.session_id.as_deref())?;
    let from_session = session.as_ref().map(|s| s.id.as_str());
    let from_port = session.as_ref().and_then(|s| s.port_id.as_deref());

    let escalation = services.escalations().open(
        from_session,
        from_port,
        escalation_type,
        severity,
        &args.issue,
        args.context.as_deref(),
        args.suggestion.as_deref(),
    )?;

    to_value(EscalateResult {
        escalation_id: escalation.id,
        status: "created".to_string(),
        message: format!(
            "escalation {} opened ({}, {})",
            escalation.id,
            escalation.escalation_type.as_str(),
            escalation.severity.as_str()
        ),
    })
}

pub fn handle_context(services: &Services, args: ContextArgs) -> Result<Value> {
    let limit = args.limit.unwrap_or(10).min(50);
    let mut items = Vec::new();

    match args.context_type.as_str() {
        "port" => {
            let ports = services.ports().list(None, 200)?;
            for port in ports {
                if let Some(query) = &args.query {
                    let haystack = format!(
                        "{} {}",
                        port.id,
                        port.title.as_deref().unwrap_or_default()
                    );
                    if !haystack.to_lowercase().contains(&query.to_lowercase()) {
                        continue;
                    }
                }
                let content = format!(
                    "{} [{}]{}",
                    port.title.as_deref().unwrap_or(&port.id),
                    port.status.as_str(),
                    port.failure_summary
                        .as_deref()
                        .map(|s| format!(" blocked: {}", s))
                        .unwrap_or_default()
                );
                let tokens = (content.len() / 4).max(1) as u32;
                items.push(ContextItem {
                    id: port.id,
                    item_type: "port".to_string(),
                    path: port.file_path,
                    content: Some(content),
                    tokens,
                });
                if items.len() >= limit {
                    break;
                }
            }
        }
        // conventions and documents live in the knowledge base, which is an
        // external collaborator; the core serves an empty projection
        "convention" | "document" => {}
        other => {
            return Err(Error::invalid_argument(format!(
                "unknown context type {:?} (expected convention, document or port)",
                other
            )));
        }
    }

    let total_tokens = items.iter().map(|i| i.tokens).sum();
    to_value(ContextResult {
        items,
        total_tokens,
    })
}

pub fn handle_session(services: &Services, args: SessionArgs) -> Result<Value> {
    let session = resolve_session(services, args.session_id.as_deref())?
        .ok_or_else(|| Error::not_found("no active session matches this caller"))?;

    let attention = services.attention().report(&session.id).ok();
    let ports: Vec<_> = services
        .ports()
        .list(Some(PortStatus::Running), 50)?
        .into_iter()
        .filter(|p| p.session_id.as_deref() == Some(session.id.as_str()))
        .collect();

    let mut result = json!({
        "session": session,
        "attention": attention,
        "active_ports": ports,
    });
    if args.include_events {
        let events = services.sessions().events(&session.id, Some(50))?;
        result["events"] = serde_json::to_value(events)
            .map_err(|e| Error::internal(e.to_string()))?;
    }
    Ok(result)
}

pub fn handle_hierarchy(services: &Services, args: HierarchyArgs) -> Result<Value> {
    let mut roots = match &args.session_id {
        Some(id) => {
            let session = services.sessions().get(id)?;
            vec![services.sessions().tree(&session.root_session_id)?]
        }
        None => {
            let mut trees = Vec::new();
            for root in services.sessions().roots(10)? {
                trees.push(services.sessions().tree(&root.id)?);
            }
            trees
        }
    };

    if let Some(depth) = args.depth {
        for tree in &mut roots {
            prune(tree, depth);
        }
    }

    let counts = services.ports().summary()?;
    let stats = services.sessions().stats()?;

    to_value(json!({
        "hierarchy": roots,
        "ports": {
            "running": counts.running,
            "pending": counts.pending,
            "complete": counts.complete,
            "blocked": counts.blocked,
        },
        "summary": stats,
    }))
}

fn prune(node: &mut pal_services::SessionTreeNode, depth: u32) {
    if depth == 0 {
        node.children.clear();
        return;
    }
    for child in &mut node.children {
        prune(child, depth - 1);
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::internal(e.to_string()))
}
