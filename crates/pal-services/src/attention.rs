use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{
    AttentionConfig, AttentionLevel, AttentionState, BusEvent, CheckpointTrigger, CompactEvent,
    CompactTrigger, Error, ErrorKind, EventType, PalConfig, PushType, RestoreBundle, Result,
};
use serde::Serialize;
use serde_json::json;

use crate::checkpoint;

const OBSERVE_RETRIES: u32 = 5;

/// What one `observe` did to the session's attention.
#[derive(Debug, Clone, Serialize)]
pub struct ObserveOutcome {
    pub state: AttentionState,
    pub level: AttentionLevel,
    /// Set when this observe crossed the checkpoint threshold upward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<i64>,
}

/// Read-only attention snapshot for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionReport {
    pub state: AttentionState,
    pub level: AttentionLevel,
    pub usage_ratio: f64,
}

pub struct AttentionService<'a> {
    bus: &'a EventBus,
    config: &'a PalConfig,
}

impl<'a> AttentionService<'a> {
    pub fn new(bus: &'a EventBus, config: &'a PalConfig) -> Self {
        Self { bus, config }
    }

    fn attention_config(&self) -> AttentionConfig {
        AttentionConfig::from(self.config)
    }

    /// Create the per-session state row. Idempotent: an existing row is
    /// returned unchanged.
    pub fn init(&self, session_id: &str, budget: Option<u64>) -> Result<AttentionState> {
        let token_budget = budget.unwrap_or(self.config.token_budget);
        self.bus.publish_with(|tx, _events| {
            if let Some(existing) = queries::attention::get(tx, session_id)? {
                return Ok(existing);
            }
            let state = AttentionState::new(session_id, token_budget);
            queries::attention::insert(tx, &state)?;
            Ok(state)
        })
    }

    pub fn get(&self, session_id: &str) -> Result<AttentionState> {
        self.bus
            .store()
            .read(|conn| queries::attention::get(conn, session_id))?
            .ok_or_else(|| {
                Error::not_found(format!("no attention state for session {}", session_id))
                    .with_cause(session_id)
            })
    }

    pub fn set_port(&self, session_id: &str, port_id: Option<&str>) -> Result<()> {
        self.mutate(session_id, |state| {
            state.port_id = port_id.map(String::from);
        })
    }

    pub fn report(&self, session_id: &str) -> Result<AttentionReport> {
        let state = self.get(session_id)?;
        let level = state.level(&self.attention_config());
        Ok(AttentionReport {
            usage_ratio: state.usage_ratio(),
            level,
            state,
        })
    }

    pub fn list(&self) -> Result<Vec<AttentionState>> {
        Ok(self.bus.store().read(queries::attention::list)?)
    }

    /// Compaction history for a session, newest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<CompactEvent>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::compact::list_for_session(conn, session_id, limit))?)
    }

    /// Account a context delta and rescore the session.
    ///
    /// Drift rises when edits touch files outside the loaded set, decays on
    /// every observe that stays in scope, and the focus score only falls
    /// between compactions. Crossing the checkpoint threshold upward fires
    /// exactly one auto-checkpoint until usage drops back below it.
    pub fn observe(
        &self,
        session_id: &str,
        delta_tokens: i64,
        edited_files: &[String],
        loaded_refs: &[String],
    ) -> Result<ObserveOutcome> {
        let mut attempt = 0;
        loop {
            match self.try_observe(session_id, delta_tokens, edited_files, loaded_refs) {
                Err(err)
                    if err.kind() == ErrorKind::Conflict && attempt < OBSERVE_RETRIES =>
                {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn try_observe(
        &self,
        session_id: &str,
        delta_tokens: i64,
        edited_files: &[String],
        loaded_refs: &[String],
    ) -> Result<ObserveOutcome> {
        let config = self.attention_config();
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let mut state = queries::attention::get(tx, session_id)?.ok_or_else(|| {
                Error::not_found(format!("no attention state for session {}", session_id))
                    .with_cause(session_id)
            })?;
            let expected_version = state.version;

            state.loaded_tokens =
                (state.loaded_tokens as i64 + delta_tokens).max(0) as u64;
            state.available_tokens = state.token_budget.saturating_sub(state.loaded_tokens);

            // scope check before the lists grow
            let new_files: Vec<&String> = edited_files
                .iter()
                .filter(|f| !state.loaded_files.contains(*f))
                .collect();
            let new_refs: Vec<&String> = loaded_refs
                .iter()
                .filter(|r| !state.loaded_conventions.contains(*r))
                .collect();

            for file in edited_files {
                let event_type = if new_files.contains(&file) {
                    EventType::UntrackedEdit
                } else {
                    EventType::FileEdit
                };
                let data = json!({ "file": file });
                let event_id =
                    queries::event::append(tx, session_id, event_type, &data.to_string(), now)?;
                let mut event = BusEvent::session(session_id, event_type, data);
                event.id = event_id;
                events.push(event);
            }

            let broadened = !new_files.is_empty() || !new_refs.is_empty();
            if broadened {
                let mut increment = 0.0;
                if !new_files.is_empty() {
                    increment += config.drift_increment * config.files_weight;
                }
                if !new_refs.is_empty() {
                    increment += config.drift_increment * config.conventions_weight;
                }
                state.drift_score = (state.drift_score + increment).min(1.0);
                state.drift_count += 1;
            } else {
                state.drift_score =
                    (state.drift_score - config.drift_decay_per_event).max(0.0);
            }

            state
                .loaded_files
                .extend(new_files.into_iter().cloned());
            state
                .loaded_conventions
                .extend(new_refs.into_iter().cloned());

            // focus only falls between compactions
            let previous_focus = state.focus_score;
            state.recompute_focus();
            state.focus_score = state.focus_score.min(previous_focus);

            if state.loaded_tokens > state.token_budget {
                let data = json!({
                    "loaded_tokens": state.loaded_tokens,
                    "token_budget": state.token_budget,
                });
                let event_id = queries::event::append(
                    tx,
                    session_id,
                    EventType::ContextOverflow,
                    &data.to_string(),
                    now,
                )?;
                let mut event =
                    BusEvent::session(session_id, EventType::ContextOverflow, data);
                event.id = event_id;
                events.push(event);
            }

            // edge-triggered auto checkpoint
            let ratio = state.usage_ratio();
            let mut checkpoint_id = None;
            if ratio >= config.checkpoint_threshold {
                if !state.checkpoint_fired {
                    let label = format!("threshold:{:.2}", ratio);
                    let (checkpoint, event) = checkpoint::create_in_tx(
                        tx,
                        session_id,
                        CheckpointTrigger::AutoThreshold,
                        &label,
                        self.config.checkpoint_event_window,
                    )?;
                    checkpoint_id = Some(checkpoint.id);
                    state.checkpoint_fired = true;
                    events.push(event);
                }
            } else {
                state.checkpoint_fired = false;
            }

            state.version += 1;
            state.updated_at = now;
            if !queries::attention::update_if_version(tx, &state, expected_version)? {
                return Err(Error::conflict(format!(
                    "attention state for {} changed underneath the observer",
                    session_id
                ))
                .into());
            }

            let level = state.level(&config);
            match level {
                AttentionLevel::Warning => events.push(
                    BusEvent::push(
                        PushType::AttentionWarning,
                        json!({
                            "usage_ratio": ratio,
                            "focus_score": state.focus_score,
                        }),
                    )
                    .with_session(session_id),
                ),
                AttentionLevel::Critical => events.push(
                    BusEvent::push(
                        PushType::AttentionCritical,
                        json!({
                            "usage_ratio": ratio,
                            "focus_score": state.focus_score,
                        }),
                    )
                    .with_session(session_id),
                ),
                _ => {}
            }

            Ok(ObserveOutcome {
                level,
                checkpoint_id,
                state,
            })
        })
    }

    /// Record a context-window compaction: snapshot a pre-compact
    /// checkpoint, write the compact row, bump the session counter, and
    /// reset the attention state down to the surviving token count.
    #[allow(clippy::too_many_arguments)]
    pub fn record_compact(
        &self,
        session_id: &str,
        reason: CompactTrigger,
        before_tokens: u64,
        after_tokens: u64,
        preserved: Option<&str>,
        discarded: Option<&str>,
        hint: Option<&str>,
    ) -> Result<CompactEvent> {
        if after_tokens >= before_tokens {
            return Err(Error::invalid_argument(format!(
                "compaction must shrink the context ({} -> {})",
                before_tokens, after_tokens
            )));
        }
        let config = self.attention_config();
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let mut state = queries::attention::get(tx, session_id)?.ok_or_else(|| {
                Error::not_found(format!("no attention state for session {}", session_id))
                    .with_cause(session_id)
            })?;
            let expected_version = state.version;

            let (checkpoint, checkpoint_event) = checkpoint::create_in_tx(
                tx,
                session_id,
                CheckpointTrigger::PreCompact,
                "pre_compact",
                self.config.checkpoint_event_window,
            )?;
            events.push(checkpoint_event);

            let compact_id = queries::compact::insert(
                tx,
                session_id,
                reason,
                before_tokens,
                after_tokens,
                preserved,
                discarded,
                checkpoint.id,
                hint,
                now,
            )?;

            if !queries::session::increment_compact(tx, session_id, now)? {
                return Err(Error::not_found(format!(
                    "session {} not found",
                    session_id
                ))
                .with_cause(session_id)
                .into());
            }

            state.loaded_tokens = after_tokens;
            state.available_tokens = state.token_budget.saturating_sub(after_tokens);
            state.drift_count = 0;
            state.last_compaction_at = Some(now);
            state.checkpoint_fired = state.usage_ratio() >= config.checkpoint_threshold;
            // the compaction resets the monotonic focus window
            state.recompute_focus();
            state.version += 1;
            state.updated_at = now;
            if !queries::attention::update_if_version(tx, &state, expected_version)? {
                return Err(Error::conflict(format!(
                    "attention state for {} changed underneath the compaction",
                    session_id
                ))
                .into());
            }

            let data = json!({
                "trigger_reason": reason,
                "before_tokens": before_tokens,
                "after_tokens": after_tokens,
                "checkpoint_before": checkpoint.id,
            });
            let event_id = queries::event::append(
                tx,
                session_id,
                EventType::Compact,
                &data.to_string(),
                now,
            )?;
            let mut event = BusEvent::session(session_id, EventType::Compact, data.clone());
            event.id = event_id;
            events.push(event);

            events.push(BusEvent::push(PushType::CompactTriggered, data).with_session(session_id));

            Ok(CompactEvent {
                id: compact_id,
                session_id: session_id.to_string(),
                trigger_reason: reason,
                before_tokens,
                after_tokens,
                preserved_context: preserved.map(String::from),
                discarded_context: discarded.map(String::from),
                checkpoint_before: checkpoint.id,
                recovery_hint: hint.map(String::from),
                created_at: now,
            })
        })
    }

    /// Recovery payload after a compaction: latest checkpoint plus the
    /// events appended since.
    pub fn build_recovery_context(&self, session_id: &str) -> Result<RestoreBundle> {
        crate::CheckpointService::new(self.bus, self.config).build_latest_bundle(session_id)
    }

    fn mutate(&self, session_id: &str, f: impl Fn(&mut AttentionState)) -> Result<()> {
        self.bus.publish_with(|tx, _events| {
            let mut state = queries::attention::get(tx, session_id)?.ok_or_else(|| {
                Error::not_found(format!("no attention state for session {}", session_id))
                    .with_cause(session_id)
            })?;
            let expected_version = state.version;
            f(&mut state);
            state.version += 1;
            state.updated_at = Utc::now();
            if !queries::attention::update_if_version(tx, &state, expected_version)? {
                return Err(Error::conflict("attention state changed underneath the writer").into());
            }
            Ok(())
        })
    }
}
