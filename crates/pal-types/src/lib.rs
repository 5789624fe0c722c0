mod agent;
mod attention;
mod checkpoint;
pub mod config;
mod error;
mod escalation;
mod event;
mod handoff;
mod message;
mod orchestration;
mod port;
mod session;
mod util;

pub use agent::{Agent, AgentVersion};
pub use attention::{
    AttentionConfig, AttentionLevel, AttentionState, CompactEvent, CompactTrigger,
};
pub use checkpoint::{Checkpoint, CheckpointTrigger, RestoreBundle};
pub use config::PalConfig;
pub use error::{Error, ErrorKind, Result};
pub use escalation::{Escalation, EscalationStatus, EscalationType, Severity};
pub use event::{BusEvent, EventKind, EventType, PushType, SessionEvent};
pub use handoff::{Handoff, HandoffType};
pub use message::{Message, MessageStatus};
pub use orchestration::{Orchestration, OrchestrationStatus};
pub use port::{ChecklistItem, ChecklistResult, Port, PortDependency, PortStatus, PortType};
pub use session::{Session, SessionStatus, SessionType, TokenTotals};
pub use util::{fingerprint, new_session_id};
