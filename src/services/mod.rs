//! Services module for the agent service lifecycle

pub mod funding;
pub mod lifecycle;
pub mod record;
pub mod staking;

// Re-export the orchestrator surface
pub use funding::{FundingReport, FundingTarget, FundingTransfer};
pub use lifecycle::{ServiceManager, ServiceRequest, StepOutcome, UpdateRequest};
pub use record::{
    ChainData, FundRequirements, KeyRef, LedgerConfig, LifecycleStep, OnChainState,
    ServiceRecord, ServiceSummary, UserParams,
};
