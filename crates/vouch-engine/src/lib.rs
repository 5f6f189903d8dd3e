//! The Vouch engine: consent ledger, risk aggregation and the session
//! lifecycle, wired over any [`GrantStore`](vouch_core::store::GrantStore) +
//! [`SessionStore`](vouch_core::store::SessionStore) backend.

pub mod aggregator;
pub mod checks;
pub mod completion;
pub mod config;
pub mod consent;
pub mod engine;
pub mod memory;
pub mod session;
pub mod sinks;
pub mod stats;
pub mod stubs;

pub use aggregator::{RiskAggregator, ScreenerRegistry};
pub use config::EngineConfig;
pub use engine::{Engine, EngineDeps};
pub use memory::MemoryStore;
