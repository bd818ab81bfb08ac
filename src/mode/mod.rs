//! 模式层：稳态控制（NORMAL / ALERT / DEGRADED / LOCKDOWN / RECOVERY）与治理接口

pub mod controller;
pub mod governance;
pub mod state;

pub use controller::{ModeController, ModeError, ModeHandle};
pub use governance::{AllowAll, DefaultGovernance, Governance, Operation};
pub use state::{Mode, ModeState, ModeThresholds, ModeTransition, ThresholdSet, TriggerMetric};
