use chrono::Utc;
use pal_bus::EventBus;
use pal_store::queries::{self, lock::LockRecord};
use pal_types::{Error, Result};

/// Coarse advisory locks for agents that want mutual exclusion on external
/// resources. Locks never expire on their own; the zombie sweep releases
/// locks held by sessions it closes.
pub struct LockService<'a> {
    bus: &'a EventBus,
}

impl<'a> LockService<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Idempotent per holder. Returns Conflict when another session holds
    /// the resource.
    pub fn acquire(&self, resource: &str, session_id: &str) -> Result<()> {
        let now = Utc::now();
        self.bus.publish_with(|tx, _events| {
            if !queries::lock::acquire(tx, resource, session_id, now)? {
                return Err(Error::conflict(format!(
                    "resource {} is locked by another session",
                    resource
                ))
                .with_cause(resource)
                .into());
            }
            Ok(())
        })
    }

    /// Release requires the matching holder.
    pub fn release(&self, resource: &str, session_id: &str) -> Result<()> {
        self.bus.publish_with(|tx, _events| {
            if !queries::lock::release(tx, resource, session_id)? {
                return Err(Error::conflict(format!(
                    "resource {} is not held by session {}",
                    resource, session_id
                ))
                .with_cause(resource)
                .into());
            }
            Ok(())
        })
    }

    pub fn list(&self) -> Result<Vec<LockRecord>> {
        Ok(self.bus.store().read(queries::lock::list)?)
    }
}
