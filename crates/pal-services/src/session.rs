use chrono::{Duration, Utc};
use pal_bus::EventBus;
use pal_store::{queries, HistoryBucket, SessionStats};
use pal_types::{
    fingerprint, new_session_id, BusEvent, Error, EventType, PalConfig, Result, Session,
    SessionStatus, SessionType, TokenTotals,
};
use serde::Serialize;
use serde_json::json;

/// Inputs for `Start`. Everything the agent process knows about itself.
#[derive(Debug, Clone)]
pub struct StartSessionOptions {
    pub id: Option<String>,
    pub session_type: SessionType,
    pub title: Option<String>,
    pub parent_session: Option<String>,
    pub port_id: Option<String>,
    pub project_root: String,
    pub cwd: String,
    pub tty: Option<String>,
    pub parent_pid: Option<i64>,
    pub runtime_id: Option<String>,
}

impl StartSessionOptions {
    pub fn new(
        session_type: SessionType,
        project_root: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            session_type,
            title: None,
            parent_session: None,
            port_id: None,
            project_root: project_root.into(),
            cwd: cwd.into(),
            tty: None,
            parent_pid: None,
            runtime_id: None,
        }
    }
}

/// One node of the session hierarchy for `GetTree`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTreeNode {
    #[serde(flatten)]
    pub session: Session,
    pub children: Vec<SessionTreeNode>,
}

pub struct SessionService<'a> {
    bus: &'a EventBus,
    config: &'a PalConfig,
}

impl<'a> SessionService<'a> {
    pub fn new(bus: &'a EventBus, config: &'a PalConfig) -> Self {
        Self { bus, config }
    }

    /// Create a session and log `session_start`.
    pub fn start(&self, opts: StartSessionOptions) -> Result<Session> {
        let id = opts.id.clone().unwrap_or_else(new_session_id);
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            if queries::session::get(tx, &id)?.is_some() {
                return Err(Error::conflict(format!("session {} already exists", id))
                    .with_cause(&id)
                    .into());
            }

            let (root_id, depth, path) = match &opts.parent_session {
                None => (id.clone(), 0u32, Vec::new()),
                Some(parent_id) => {
                    let parent = queries::session::get(tx, parent_id)?.ok_or_else(|| {
                        Error::not_found(format!("parent session {} not found", parent_id))
                            .with_cause(parent_id)
                    })?;
                    if !parent.is_running() {
                        return Err(Error::parent_not_running(format!(
                            "parent session {} is {}",
                            parent_id,
                            parent.status.as_str()
                        ))
                        .with_cause(parent_id)
                        .into());
                    }
                    (
                        parent.root_session_id.clone(),
                        parent.depth + 1,
                        parent.child_path(),
                    )
                }
            };

            let session = Session {
                id: id.clone(),
                session_type: opts.session_type,
                status: SessionStatus::Running,
                title: opts.title.clone(),
                port_id: opts.port_id.clone(),
                parent_session_id: opts.parent_session.clone(),
                root_session_id: root_id,
                depth,
                path,
                runtime_id: opts.runtime_id.clone(),
                project_root: opts.project_root.clone(),
                cwd: opts.cwd.clone(),
                tty: opts.tty.clone(),
                parent_pid: opts.parent_pid,
                fingerprint: fingerprint(&opts.cwd, opts.tty.as_deref(), opts.parent_pid, now),
                started_at: now,
                ended_at: None,
                usage: TokenTotals::default(),
                cost: 0.0,
                compact_count: 0,
                last_compact_at: None,
            };
            queries::session::insert(tx, &session)?;

            let data = json!({
                "session_type": session.session_type,
                "parent_session_id": session.parent_session_id,
                "project_root": session.project_root,
            });
            let event_id =
                queries::event::append(tx, &id, EventType::SessionStart, &data.to_string(), now)?;
            let mut event = BusEvent::session(&id, EventType::SessionStart, data);
            event.id = event_id;
            events.push(event);

            Ok(session)
        })
    }

    /// Idempotent: a second end on a terminal session is a no-op.
    pub fn end(&self, session_id: &str, reason: Option<&str>) -> Result<Session> {
        self.finish(session_id, SessionStatus::Complete, reason)
    }

    pub fn finish(
        &self,
        session_id: &str,
        status: SessionStatus,
        reason: Option<&str>,
    ) -> Result<Session> {
        if !status.is_terminal() {
            return Err(Error::invalid_argument(
                "sessions can only transition to a terminal status",
            ));
        }
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let session = queries::session::get(tx, session_id)?.ok_or_else(|| {
                Error::not_found(format!("session {} not found", session_id))
                    .with_cause(session_id)
            })?;

            if !queries::session::finish(tx, session_id, status, now)? {
                // already terminal: absorbing, not an error
                return Ok(session);
            }

            let data = json!({ "status": status, "reason": reason });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::SessionEnd,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::SessionEnd, data);
            event.id = event_id;
            events.push(event);

            Ok(queries::session::get(tx, session_id)?.expect("row just updated"))
        })
    }

    /// End every running session belonging to an external tool runtime.
    pub fn end_all_for_runtime(&self, runtime_id: &str, reason: &str) -> Result<Vec<Session>> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let running = queries::session::running_for_runtime(tx, runtime_id)?;
            let mut ended = Vec::with_capacity(running.len());

            for session in running {
                if queries::session::finish(tx, &session.id, SessionStatus::Complete, now)? {
                    let data = json!({ "status": "complete", "reason": reason });
                    let event_id = queries::event::append(
                        tx,
                        &session.id,
                        EventType::SessionEnd,
                        &data.to_string(),
                        now,
                    )?;
                    let mut event = BusEvent::session(&session.id, EventType::SessionEnd, data);
                    event.id = event_id;
                    events.push(event);
                    ended.push(session);
                }
            }
            Ok(ended)
        })
    }

    pub fn update_title(&self, session_id: &str, title: &str) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            if !queries::session::update_title(tx, session_id, title)? {
                return Err(Error::not_found(format!("session {} not found", session_id))
                    .with_cause(session_id)
                    .into());
            }
            let data = json!({ "action": "update_title", "title": title });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::Decision,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::Decision, data);
            event.id = event_id;
            events.push(event);
            Ok(())
        })
    }

    /// Accumulate model token usage onto the session row.
    pub fn update_usage(
        &self,
        session_id: &str,
        delta: TokenTotals,
        cost_delta: f64,
    ) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            if !queries::session::add_usage(tx, session_id, &delta, cost_delta)? {
                return Err(Error::not_found(format!("session {} not found", session_id))
                    .with_cause(session_id)
                    .into());
            }
            let data = json!({
                "input": delta.input,
                "output": delta.output,
                "cache_read": delta.cache_read,
                "cache_create": delta.cache_create,
                "cost": cost_delta,
            });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::ContextLoaded,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::ContextLoaded, data);
            event.id = event_id;
            events.push(event);
            Ok(())
        })
    }

    /// Bump the session's compaction counter. The attention service calls
    /// the full compaction bookkeeping; this is the bare counter op for
    /// callers that track compactions externally.
    pub fn increment_compact(&self, session_id: &str) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            if !queries::session::increment_compact(tx, session_id, now)? {
                return Err(Error::not_found(format!("session {} not found", session_id))
                    .with_cause(session_id)
                    .into());
            }
            let data = json!({ "counted_only": true });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::Compact,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::Compact, data);
            event.id = event_id;
            events.push(event);
            Ok(())
        })
    }

    /// Log a free-form event onto a session (decision, user_request,
    /// file_edit and friends arrive through here).
    pub fn log_event(
        &self,
        session_id: &str,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<i64> {
        let now = Utc::now();
        self.bus.publish_with(|tx, events| {
            let event_id = queries::event::append(
                tx,
                session_id,
                event_type,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, event_type, data.clone());
            event.id = event_id;
            events.push(event);
            Ok(event_id)
        })
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.bus
            .store()
            .read(|conn| queries::session::get(conn, session_id))?
            .ok_or_else(|| {
                Error::not_found(format!("session {} not found", session_id))
                    .with_cause(session_id)
            })
    }

    pub fn list(&self, active_only: bool, limit: usize) -> Result<Vec<Session>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::session::list(conn, active_only, limit))?)
    }

    pub fn children(&self, parent_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::session::children(conn, parent_id))?)
    }

    pub fn roots(&self, limit: usize) -> Result<Vec<Session>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::session::roots(conn, limit))?)
    }

    /// The full tree under a root session, nested.
    pub fn tree(&self, root_id: &str) -> Result<SessionTreeNode> {
        let sessions = self
            .bus
            .store()
            .read(|conn| queries::session::subtree(conn, root_id))?;
        build_tree(root_id, sessions).ok_or_else(|| {
            Error::not_found(format!("session {} not found", root_id)).with_cause(root_id)
        })
    }

    pub fn events(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<pal_types::SessionEvent>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::event::list_for_session(conn, session_id, limit))?)
    }

    pub fn stats(&self) -> Result<SessionStats> {
        Ok(self.bus.store().read(queries::session::stats)?)
    }

    pub fn history(&self, days: u32) -> Result<Vec<HistoryBucket>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::session::history(conn, days))?)
    }

    /// Resolve the active session for a caller that did not pass an id.
    /// Derived fresh on every call; never cached.
    pub fn find_active(
        &self,
        runtime_id: Option<&str>,
        fingerprint: Option<&str>,
        cwd: Option<&str>,
        project_root: Option<&str>,
    ) -> Result<Option<Session>> {
        Ok(self.bus.store().read(|conn| {
            queries::session::find_active(conn, runtime_id, fingerprint, cwd, project_root)
        })?)
    }

    /// Close running sessions older than the configured zombie threshold,
    /// releasing their advisory locks and logging `zombie_cleanup` for each.
    pub fn sweep_zombies(&self) -> Result<Vec<Session>> {
        let cutoff = Utc::now() - Duration::hours(self.config.zombie_max_age_hours as i64);
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let swept = queries::session::sweep_zombies(tx, cutoff)?;
            if swept.is_empty() {
                return Ok(swept);
            }

            let ids: Vec<String> = swept.iter().map(|s| s.id.clone()).collect();
            let released = queries::lock::release_for_sessions(tx, &ids)?;

            for session in &swept {
                let data = json!({
                    "started_at": session.started_at,
                    "cutoff": cutoff,
                    "locks_released": released,
                });
                let event_id = queries::event::append(
                    tx,
                    &session.id,
                    EventType::ZombieCleanup,
                    &data.to_string(),
                    now,
                )?;
                let mut event = BusEvent::session(&session.id, EventType::ZombieCleanup, data);
                event.id = event_id;
                events.push(event);
            }
            Ok(swept)
        })
    }
}

fn build_tree(root_id: &str, sessions: Vec<Session>) -> Option<SessionTreeNode> {
    use std::collections::HashMap;

    let mut children_of: HashMap<String, Vec<Session>> = HashMap::new();
    let mut root = None;
    for session in sessions {
        if session.id == root_id {
            root = Some(session);
        } else if let Some(parent) = session.parent_session_id.clone() {
            children_of.entry(parent).or_default().push(session);
        }
    }

    fn attach(
        session: Session,
        children_of: &mut std::collections::HashMap<String, Vec<Session>>,
    ) -> SessionTreeNode {
        let children = children_of
            .remove(&session.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| attach(child, children_of))
            .collect();
        SessionTreeNode { session, children }
    }

    root.map(|session| attach(session, &mut children_of))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Services;
    use pal_store::Store;
    use pal_types::{ErrorKind, PalConfig};

    fn services() -> Services {
        Services::new(Store::open_in_memory().unwrap(), PalConfig::default())
    }

    fn start_opts(session_type: SessionType) -> StartSessionOptions {
        StartSessionOptions::new(session_type, "/work/proj", "/work/proj")
    }

    #[test]
    fn test_start_assigns_identity() {
        let services = services();
        let session = services
            .sessions()
            .start(start_opts(SessionType::Main))
            .unwrap();

        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.root_session_id, session.id);
        assert_eq!(session.depth, 0);
        assert!(session.path.is_empty());
        assert_eq!(session.fingerprint.len(), 12);

        let events = services.sessions().events(&session.id, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SessionStart);
    }

    #[test]
    fn test_child_inherits_root_and_path() {
        let services = services();
        let root = services
            .sessions()
            .start(start_opts(SessionType::Build))
            .unwrap();

        let mut opts = start_opts(SessionType::Operator);
        opts.parent_session = Some(root.id.clone());
        let operator = services.sessions().start(opts).unwrap();

        assert_eq!(operator.root_session_id, root.id);
        assert_eq!(operator.depth, 1);
        assert_eq!(operator.path, vec![root.id.clone()]);

        let mut opts = start_opts(SessionType::Worker);
        opts.parent_session = Some(operator.id.clone());
        let worker = services.sessions().start(opts).unwrap();

        assert_eq!(worker.root_session_id, root.id);
        assert_eq!(worker.depth, 2);
        assert_eq!(worker.path, vec![root.id.clone(), operator.id.clone()]);
        assert_eq!(worker.depth as usize, worker.path.len());
    }

    #[test]
    fn test_unknown_parent_and_terminal_parent() {
        let services = services();

        let mut opts = start_opts(SessionType::Worker);
        opts.parent_session = Some("ghost".to_string());
        let err = services.sessions().start(opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let parent = services
            .sessions()
            .start(start_opts(SessionType::Operator))
            .unwrap();
        services.sessions().end(&parent.id, None).unwrap();

        let mut opts = start_opts(SessionType::Worker);
        opts.parent_session = Some(parent.id.clone());
        let err = services.sessions().start(opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParentNotRunning);
    }

    #[test]
    fn test_start_with_taken_id_conflicts() {
        let services = services();
        let session = services
            .sessions()
            .start(start_opts(SessionType::Single))
            .unwrap();
        services.sessions().end(&session.id, None).unwrap();

        let mut opts = start_opts(SessionType::Single);
        opts.id = Some(session.id.clone());
        let err = services.sessions().start(opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_end_is_idempotent() {
        let services = services();
        let session = services
            .sessions()
            .start(start_opts(SessionType::Single))
            .unwrap();

        let first = services.sessions().end(&session.id, Some("done")).unwrap();
        assert_eq!(first.status, SessionStatus::Complete);
        assert!(first.ended_at.is_some());

        let second = services.sessions().end(&session.id, None).unwrap();
        assert_eq!(second.status, SessionStatus::Complete);

        // exactly one session_end event
        let events = services.sessions().events(&session.id, None).unwrap();
        let ends = events
            .iter()
            .filter(|e| e.event_type == EventType::SessionEnd)
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_end_all_for_runtime() {
        let services = services();
        let mut opts = start_opts(SessionType::Main);
        opts.runtime_id = Some("rt-9".to_string());
        let a = services.sessions().start(opts.clone()).unwrap();
        opts.id = None;
        let b = services.sessions().start(opts).unwrap();
        let other = services
            .sessions()
            .start(start_opts(SessionType::Single))
            .unwrap();

        let ended = services
            .sessions()
            .end_all_for_runtime("rt-9", "runtime exited")
            .unwrap();
        assert_eq!(ended.len(), 2);

        for id in [&a.id, &b.id] {
            let session = services.sessions().get(id).unwrap();
            assert_eq!(session.status, SessionStatus::Complete);
        }
        assert_eq!(
            services.sessions().get(&other.id).unwrap().status,
            SessionStatus::Running
        );
    }

    #[test]
    fn test_tree_nests_children() {
        let services = services();
        let root = services
            .sessions()
            .start(start_opts(SessionType::Build))
            .unwrap();
        let mut opts = start_opts(SessionType::Operator);
        opts.parent_session = Some(root.id.clone());
        let operator = services.sessions().start(opts).unwrap();
        let mut opts = start_opts(SessionType::Worker);
        opts.parent_session = Some(operator.id.clone());
        services.sessions().start(opts).unwrap();

        let tree = services.sessions().tree(&root.id).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(
            tree.children[0].session.session_type,
            SessionType::Operator
        );
    }

    #[test]
    fn test_usage_accumulates_and_logs() {
        let services = services();
        let session = services
            .sessions()
            .start(start_opts(SessionType::Worker))
            .unwrap();

        let delta = TokenTotals {
            input: 500,
            output: 40,
            cache_read: 0,
            cache_create: 0,
        };
        services
            .sessions()
            .update_usage(&session.id, delta, 0.02)
            .unwrap();

        let loaded = services.sessions().get(&session.id).unwrap();
        assert_eq!(loaded.usage.input, 500);

        let events = services.sessions().events(&session.id, None).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ContextLoaded));
    }
}
