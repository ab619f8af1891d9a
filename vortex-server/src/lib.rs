//! Library surface for `vortex-server`, split out from the binary so that
//! integration tests under `tests/` can wire up a real listener the same
//! way `main` does.

pub mod config;
pub mod context;
pub mod peer_link;
pub mod server;
pub mod worker_pool;
