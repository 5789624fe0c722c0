use pal_services::Services;
use pal_types::{BusEvent, PushType, Result, Session, SessionType};
use pal_services::StartSessionOptions;
use serde::Serialize;
use serde_json::json;

/// The implementation + test child sessions spawned under an operator for
/// one port.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPair {
    pub port_id: String,
    pub worker_session_id: String,
    pub test_session_id: String,
}

/// Create the pair's session rows and announce them. No model is launched
/// here; the rows plus the `worker:spawn` events are the contract with the
/// external agent runner.
pub fn spawn_pair(
    services: &Services,
    operator: &Session,
    port_id: &str,
    project_root: &str,
) -> Result<WorkerPair> {
    let inputs = services.handoffs().inputs(port_id)?;
    let input_ids: Vec<i64> = inputs.iter().map(|h| h.id).collect();

    let worker = start_child(services, operator, SessionType::Worker, port_id, project_root)?;
    let test = start_child(services, operator, SessionType::Test, port_id, project_root)?;

    for (session, role) in [(&worker, "implementation"), (&test, "test")] {
        services.bus().publish_push(
            BusEvent::push(
                PushType::WorkerSpawn,
                json!({
                    "port_id": port_id,
                    "session_id": session.id,
                    "role": role,
                    "operator_session_id": operator.id,
                    "inputs": input_ids,
                }),
            )
            .with_session(&session.id)
            .with_port(port_id),
        );
    }

    Ok(WorkerPair {
        port_id: port_id.to_string(),
        worker_session_id: worker.id,
        test_session_id: test.id,
    })
}

fn start_child(
    services: &Services,
    operator: &Session,
    session_type: SessionType,
    port_id: &str,
    project_root: &str,
) -> Result<Session> {
    let mut opts = StartSessionOptions::new(session_type, project_root, project_root);
    opts.parent_session = Some(operator.id.clone());
    opts.port_id = Some(port_id.to_string());
    opts.title = Some(format!("{} {}", session_type.as_str(), port_id));
    services.sessions().start(opts)
}
