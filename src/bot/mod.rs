pub mod engine;
pub mod entity_state;
pub mod filter;
pub mod reconciler;
pub mod retry;
pub mod staking;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineSettings, LifecycleEngine};
pub use reconciler::ReconcilerSettings;
pub use staking::StakingPolicy;
