use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries;
use pal_types::{BusEvent, Error, Message, MessageStatus, PushType, Result};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct SendMessageOptions {
    pub conversation_id: String,
    pub from_session: String,
    pub to_session: Option<String>,
    pub message_type: String,
    pub subtype: Option<String>,
    pub payload: String,
    pub token_count: u32,
    pub port_id: Option<String>,
    pub priority: u8,
    pub attention_score: Option<f64>,
    pub context_snapshot: Option<String>,
}

pub struct MessageService<'a> {
    bus: &'a EventBus,
}

impl<'a> MessageService<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    pub fn send(&self, opts: SendMessageOptions) -> Result<Message> {
        if !(1..=9).contains(&opts.priority) {
            return Err(Error::invalid_argument(format!(
                "priority must be 1..9, got {}",
                opts.priority
            )));
        }
        let now = Utc::now();

        self.bus.publish_with(|tx, events| {
            let message = Message {
                id: 0,
                conversation_id: opts.conversation_id.clone(),
                from_session: opts.from_session.clone(),
                to_session: opts.to_session.clone(),
                message_type: opts.message_type.clone(),
                subtype: opts.subtype.clone(),
                payload: opts.payload.clone(),
                attention_score: opts.attention_score,
                context_snapshot: opts.context_snapshot.clone(),
                token_count: opts.token_count,
                cumulative_tokens: 0,
                status: MessageStatus::Pending,
                port_id: opts.port_id.clone(),
                priority: opts.priority,
                created_at: now,
                processed_at: None,
            };
            let id = queries::message::insert(tx, &message)?;

            events.push(BusEvent::push(
                PushType::MessageNew,
                json!({
                    "message_id": id,
                    "conversation_id": &opts.conversation_id,
                    "from_session": &opts.from_session,
                    "to_session": &opts.to_session,
                    "priority": opts.priority,
                }),
            ));

            Ok(queries::message::get(tx, id)?.expect("row just inserted"))
        })
    }

    /// Advance the forward-only status machine.
    pub fn transition(&self, message_id: i64, to: MessageStatus) -> Result<Message> {
        let now = Utc::now();
        self.bus.publish_with(|tx, _events| {
            let message = queries::message::get(tx, message_id)?.ok_or_else(|| {
                Error::not_found(format!("message {} not found", message_id))
                    .with_cause(message_id.to_string())
            })?;

            if !message.status.can_transition_to(to) {
                return Err(Error::conflict(format!(
                    "message {} cannot move {} -> {}",
                    message_id,
                    message.status.as_str(),
                    to.as_str()
                ))
                .with_cause(message_id.to_string())
                .into());
            }

            let processed_at =
                matches!(to, MessageStatus::Processed | MessageStatus::Failed).then_some(now);
            queries::message::set_status(tx, message_id, message.status, to, processed_at)?;
            Ok(queries::message::get(tx, message_id)?.expect("row just updated"))
        })
    }

    pub fn conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::message::list_conversation(conn, conversation_id))?)
    }

    pub fn pending_for(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .bus
            .store()
            .read(|conn| queries::message::pending_for(conn, session_id))?)
    }
}
