use pal_bus::EventBus;
use pal_store::Store;
use pal_types::PalConfig;

use crate::{
    AgentService, AttentionService, CheckpointService, EscalationService, HandoffService,
    LockService, MessageService, PortService, SessionService,
};

/// Entry point to the service layer. Cheap to clone; all three endpoints
/// (tool server, push server, CLI) hold one of these.
#[derive(Clone)]
pub struct Services {
    bus: EventBus,
    config: PalConfig,
}

impl Services {
    pub fn new(store: Store, config: PalConfig) -> Self {
        Self {
            bus: EventBus::new(store),
            config,
        }
    }

    pub fn from_bus(bus: EventBus, config: PalConfig) -> Self {
        Self { bus, config }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Store {
        self.bus.store()
    }

    pub fn config(&self) -> &PalConfig {
        &self.config
    }

    pub fn sessions(&self) -> SessionService<'_> {
        SessionService::new(&self.bus, &self.config)
    }

    pub fn ports(&self) -> PortService<'_> {
        PortService::new(&self.bus)
    }

    pub fn attention(&self) -> AttentionService<'_> {
        AttentionService::new(&self.bus, &self.config)
    }

    pub fn checkpoints(&self) -> CheckpointService<'_> {
        CheckpointService::new(&self.bus, &self.config)
    }

    pub fn escalations(&self) -> EscalationService<'_> {
        EscalationService::new(&self.bus)
    }

    pub fn handoffs(&self) -> HandoffService<'_> {
        HandoffService::new(&self.bus, &self.config)
    }

    pub fn messages(&self) -> MessageService<'_> {
        MessageService::new(&self.bus)
    }

    pub fn locks(&self) -> LockService<'_> {
        LockService::new(&self.bus)
    }

    pub fn agents(&self) -> AgentService<'_> {
        AgentService::new(&self.bus)
    }
}
