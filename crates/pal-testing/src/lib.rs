//! TestWorld pattern for declarative integration test setup: an isolated
//! database under a temp directory, a service layer over it, and a runner
//! for the `pal` binary pointed at the same database.

mod world;

pub use world::TestWorld;
