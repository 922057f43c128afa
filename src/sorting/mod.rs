//! Zone bookkeeping, zone selection and the sort-operation state machine.

pub mod controller;
pub mod strategy;
pub mod target;
pub mod zones;

pub use controller::{
    CapacityPolicy, ControllerConfig, FailureReason, Projection, SortOutcome, SortPhase,
    SortStatistics, SortingController,
};
pub use strategy::{ConfidenceBand, SizeBand, SortingStrategy, StrategyKind};
pub use target::SortTarget;
pub use zones::{Zone, ZoneError, ZoneManager};
