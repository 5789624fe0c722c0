use std::collections::HashMap;

use chrono::Utc;
use pal_bus::EventFilter;
use pal_services::{graph, DependencySpec, Services};
use pal_store::queries;
use pal_types::{
    BusEvent, Error, ErrorKind, EscalationType, EventKind, EventType, Orchestration,
    OrchestrationStatus, Port, PortStatus, PushType, Result, Session, SessionType, Severity,
};
use pal_services::StartSessionOptions;
use serde_json::json;
use tracing::{debug, warn};

use crate::spawn::{spawn_pair, WorkerPair};

/// One port inside an orchestration spec.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub id: String,
    pub title: Option<String>,
    pub file_path: Option<String>,
    pub deps: Vec<DependencySpec>,
}

impl PortSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            file_path: None,
            deps: Vec::new(),
        }
    }

    pub fn depends_on(mut self, upstream: impl Into<String>) -> Self {
        self.deps.push(DependencySpec::on(upstream));
        self
    }
}

/// A named bundle of ports to run as a unit.
#[derive(Debug, Clone)]
pub struct OrchestrationSpec {
    pub id: String,
    pub name: String,
    pub project_root: String,
    pub ports: Vec<PortSpec>,
}

pub struct Orchestrator {
    services: Services,
    pool_size: usize,
}

impl Orchestrator {
    pub fn new(services: Services) -> Self {
        let pool_size = services.config().effective_worker_pool_size();
        Self {
            services,
            pool_size,
        }
    }

    pub fn with_pool_size(services: Services, pool_size: usize) -> Self {
        Self {
            services,
            pool_size: pool_size.max(1),
        }
    }

    /// Execute one orchestration to its end state.
    ///
    /// The orchestrator persists the bundle, spawns a build + operator
    /// session, then keeps the dependency frontier saturated with worker
    /// pairs. It blocks on bus events (`port_end`, `escalation`); external
    /// agents drive the actual port completions.
    pub async fn run(&self, spec: OrchestrationSpec) -> Result<Orchestration> {
        let port_ids: Vec<String> = spec.ports.iter().map(|p| p.id.clone()).collect();
        let edges: Vec<(String, String)> = spec
            .ports
            .iter()
            .flat_map(|p| {
                p.deps
                    .iter()
                    .map(|d| (p.id.clone(), d.depends_on.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let order = graph::topo_order(&port_ids, &edges).ok_or_else(|| {
            Error::cycle_detected(format!("orchestration {} has a dependency cycle", spec.id))
                .with_cause(&spec.id)
        })?;

        // subscribe before any mutation so no port_end can be missed
        let mut sub = self
            .services
            .bus()
            .subscribe(EventFilter::for_kinds(["port_end", "escalation"]));

        // ports first (dependencies reference existing rows), then the bundle
        let by_id: HashMap<&str, &PortSpec> =
            spec.ports.iter().map(|p| (p.id.as_str(), p)).collect();
        for id in &order {
            let port = by_id[id.as_str()];
            self.services.ports().create(
                &port.id,
                port.title.as_deref(),
                port.file_path.as_deref(),
                &port.deps,
            )?;
        }

        let now = Utc::now();
        let orchestration = Orchestration {
            id: spec.id.clone(),
            name: spec.name.clone(),
            status: OrchestrationStatus::Pending,
            build_session_id: None,
            total_ports: 0,
            completed_ports: 0,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        self.services.bus().publish_with(|tx, _events| {
            queries::orchestration::insert(tx, &orchestration)?;
            for id in &port_ids {
                queries::orchestration::add_port(tx, &spec.id, id)?;
            }
            Ok(())
        })?;

        // build -> operator session chain
        let mut opts =
            StartSessionOptions::new(SessionType::Build, &spec.project_root, &spec.project_root);
        opts.title = Some(spec.name.clone());
        let build = self.services.sessions().start(opts)?;

        let mut opts =
            StartSessionOptions::new(SessionType::Operator, &spec.project_root, &spec.project_root);
        opts.parent_session = Some(build.id.clone());
        opts.title = Some(format!("operator {}", spec.name));
        let operator = self.services.sessions().start(opts)?;

        self.services.bus().publish_with(|tx, _events| {
            queries::orchestration::set_build_session(tx, &spec.id, &build.id)?;
            queries::orchestration::set_status(
                tx,
                &spec.id,
                OrchestrationStatus::Running,
                Some(Utc::now()),
                None,
            )?;
            Ok(())
        })?;
        self.services.bus().publish_push(BusEvent::push(
            PushType::OrchestrationStart,
            json!({
                "orchestration_id": spec.id,
                "name": spec.name,
                "total_ports": port_ids.len(),
                "build_session_id": build.id,
            }),
        ));

        let mut pairs: HashMap<String, WorkerPair> = HashMap::new();
        let mut escalated = false;

        loop {
            self.schedule(&order, &operator, &spec.project_root, &mut pairs)?;

            let snapshot = self.snapshot(&port_ids)?;
            let complete = snapshot
                .values()
                .filter(|p| p.status == PortStatus::Complete)
                .count();
            if complete == port_ids.len() {
                return self.finish(
                    &spec,
                    OrchestrationStatus::Complete,
                    &build,
                    &operator,
                );
            }

            let running = snapshot
                .values()
                .filter(|p| p.status == PortStatus::Running)
                .count();
            if running == 0
                && !self.has_eligible_pending(&snapshot)?
                && !self.has_open_escalations(&port_ids)?
            {
                return self.finish(&spec, OrchestrationStatus::Failed, &build, &operator);
            }

            let Some(event) = sub.recv().await else {
                return Err(Error::internal("event bus closed under the orchestrator"));
            };
            self.react(&spec, &port_ids, &edges, event, &mut pairs, &mut escalated, &build)?;
        }
    }

    fn snapshot(&self, port_ids: &[String]) -> Result<HashMap<String, Port>> {
        let mut ports = HashMap::new();
        for id in port_ids {
            ports.insert(id.clone(), self.services.ports().get(id)?);
        }
        Ok(ports)
    }

    fn has_eligible_pending(&self, snapshot: &HashMap<String, Port>) -> Result<bool> {
        for (id, port) in snapshot {
            if port.status != PortStatus::Pending {
                continue;
            }
            let unsatisfied = self
                .services
                .store()
                .read(|conn| queries::dependency::unsatisfied(conn, id))?;
            if unsatisfied.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn has_open_escalations(&self, port_ids: &[String]) -> Result<bool> {
        for id in port_ids {
            if !self.services.escalations().open_for_port(id)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Saturate the frontier: spawn a worker pair for every pending port
    /// whose dependencies are satisfied, up to the pool bound.
    fn schedule(
        &self,
        order: &[String],
        operator: &Session,
        project_root: &str,
        pairs: &mut HashMap<String, WorkerPair>,
    ) -> Result<()> {
        let snapshot = self.snapshot(order)?;
        let mut running = snapshot
            .values()
            .filter(|p| p.status == PortStatus::Running)
            .count();

        for id in order {
            if running >= self.pool_size {
                break;
            }
            if snapshot[id].status != PortStatus::Pending {
                continue;
            }
            let unsatisfied = self
                .services
                .store()
                .read(|conn| queries::dependency::unsatisfied(conn, id))?;
            if !unsatisfied.is_empty() {
                continue;
            }

            let pair = spawn_pair(&self.services, operator, id, project_root)?;
            match self
                .services
                .ports()
                .start(id, Some(&pair.worker_session_id))
            {
                Ok(_) => {
                    debug!(port = id.as_str(), "worker pair dispatched");
                    pairs.insert(id.clone(), pair);
                    running += 1;
                }
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    // somebody else started it between snapshot and start
                    self.end_pair(&pair, "superseded")?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn react(
        &self,
        spec: &OrchestrationSpec,
        port_ids: &[String],
        edges: &[(String, String)],
        event: BusEvent,
        pairs: &mut HashMap<String, WorkerPair>,
        escalated: &mut bool,
        build: &Session,
    ) -> Result<()> {
        match &event.kind {
            EventKind::Session(EventType::PortEnd) => {
                let Some(port_id) = event.port_id.clone() else {
                    return Ok(());
                };
                if !port_ids.contains(&port_id) {
                    return Ok(());
                }
                let status = event.data["status"].as_str().unwrap_or("");

                if let Some(pair) = pairs.remove(&port_id) {
                    self.end_pair(&pair, status)?;
                }

                match status {
                    "complete" => {
                        let progress = self.services.bus().publish_with(|tx, _events| {
                            queries::orchestration::record_completion(tx, &spec.id)
                        })?;
                        self.services.bus().publish_push(BusEvent::push(
                            PushType::OrchestrationUpdate,
                            json!({
                                "orchestration_id": spec.id,
                                "progress": progress,
                                "port_id": port_id,
                            }),
                        ));
                    }
                    "failed" => {
                        self.cascade_failure(spec, &port_id, edges, escalated, build)?;
                    }
                    // blocked: the gate already opened an escalation; wait
                    _ => {}
                }
            }
            EventKind::Session(EventType::Escalation) => {
                if event.data["status"].as_str() == Some("resolved") {
                    self.resume_blocked(port_ids)?;
                }
            }
            // events:lag and anything unknown: the loop re-reads the store
            _ => {}
        }
        Ok(())
    }

    /// Mark every transitive descendant of a failed port blocked, and open
    /// one orchestration-level escalation.
    fn cascade_failure(
        &self,
        spec: &OrchestrationSpec,
        failed_port: &str,
        edges: &[(String, String)],
        escalated: &mut bool,
        build: &Session,
    ) -> Result<()> {
        let downstream = graph::downstream_of(failed_port, edges);
        let blocked: Vec<String> = self.services.bus().publish_with(|tx, _events| {
            let mut blocked = Vec::new();
            for id in &downstream {
                if queries::port::block_pending(tx, id, "upstream_failed")? {
                    blocked.push(id.clone());
                }
            }
            queries::orchestration::set_status(
                tx,
                &spec.id,
                OrchestrationStatus::Blocked,
                None,
                None,
            )?;
            Ok(blocked)
        })?;
        warn!(
            port = failed_port,
            blocked = blocked.len(),
            "upstream failure cascaded"
        );

        if !*escalated {
            *escalated = true;
            self.services.escalations().open(
                Some(&build.id),
                Some(failed_port),
                EscalationType::Blocked,
                Severity::High,
                &format!(
                    "orchestration {}: port {} failed, {} downstream ports blocked",
                    spec.id,
                    failed_port,
                    blocked.len()
                ),
                Some(&spec.id),
                None,
            )?;
        }
        Ok(())
    }

    /// After an escalation resolves, reopen blocked ports with no
    /// remaining open escalations so the scheduler can retry them.
    fn resume_blocked(&self, port_ids: &[String]) -> Result<()> {
        for id in port_ids {
            let port = self.services.ports().get(id)?;
            if port.status != PortStatus::Blocked {
                continue;
            }
            if !self.services.escalations().open_for_port(id)?.is_empty() {
                continue;
            }
            match self.services.ports().reopen(id, None) {
                Ok(_) => debug!(port = id.as_str(), "blocked port reopened"),
                Err(err) if err.kind() == ErrorKind::Conflict => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn end_pair(&self, pair: &WorkerPair, outcome: &str) -> Result<()> {
        for session_id in [&pair.worker_session_id, &pair.test_session_id] {
            self.services.sessions().end(session_id, Some(outcome))?;
        }
        self.services.bus().publish_push(
            BusEvent::push(
                PushType::WorkerComplete,
                json!({
                    "port_id": pair.port_id,
                    "worker_session_id": pair.worker_session_id,
                    "test_session_id": pair.test_session_id,
                    "outcome": outcome,
                }),
            )
            .with_port(&pair.port_id),
        );
        Ok(())
    }

    fn finish(
        &self,
        spec: &OrchestrationSpec,
        status: OrchestrationStatus,
        build: &Session,
        operator: &Session,
    ) -> Result<Orchestration> {
        self.services.bus().publish_with(|tx, _events| {
            queries::orchestration::set_status(tx, &spec.id, status, None, Some(Utc::now()))?;
            Ok(())
        })?;

        for session in [operator, build] {
            self.services
                .sessions()
                .end(&session.id, Some(status.as_str()))?;
        }

        let orchestration = self
            .services
            .store()
            .read(|conn| queries::orchestration::get(conn, &spec.id))?
            .ok_or_else(|| {
                Error::not_found(format!("orchestration {} not found", spec.id))
                    .with_cause(&spec.id)
            })?;

        self.services.bus().publish_push(BusEvent::push(
            PushType::OrchestrationComplete,
            json!({
                "orchestration_id": spec.id,
                "status": status,
                "progress": orchestration.progress,
            }),
        ));

        Ok(orchestration)
    }
}
