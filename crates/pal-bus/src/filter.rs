use pal_types::BusEvent;

/// Subscriber-side event filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub kinds: Option<Vec<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            kinds: None,
        }
    }

    pub fn for_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            session_id: None,
            kinds: Some(kinds.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        if let Some(wanted) = &self.session_id {
            if event.session_id.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == event.kind.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_types::{EventType, PushType};
    use serde_json::json;

    #[test]
    fn test_filter_matching() {
        let event = BusEvent::session("S1", EventType::PortEnd, json!({}));

        assert!(EventFilter::all().matches(&event));
        assert!(EventFilter::for_session("S1").matches(&event));
        assert!(!EventFilter::for_session("S2").matches(&event));
        assert!(EventFilter::for_kinds(["port_end"]).matches(&event));
        assert!(!EventFilter::for_kinds(["port_start"]).matches(&event));
    }

    #[test]
    fn test_push_events_have_no_session_by_default() {
        let event = BusEvent::push(PushType::WorkerSpawn, json!({}));
        assert!(!EventFilter::for_session("S1").matches(&event));
        assert!(EventFilter::for_kinds(["worker:spawn"]).matches(&event));
    }
}
