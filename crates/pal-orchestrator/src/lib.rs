// Orchestrator: executes a named bundle of ports by spawning worker pairs
// for the dependency frontier and reacting to port_end / escalation events
// from the bus. It never runs an agent itself; it records their state and
// keeps the frontier moving.

mod orchestrator;
mod spawn;

pub use orchestrator::{Orchestrator, OrchestrationSpec, PortSpec};
pub use spawn::WorkerPair;
