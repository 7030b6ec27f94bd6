//! SendWave dispatch engine.
//!
//! Plans batch campaigns, drains them against a send gateway at a bounded
//! rate, derives progress, and re-arms interrupted work.

pub mod estimate;
pub mod gateway;
pub mod monitor;
pub mod planner;
pub mod recovery;
pub mod render;
pub mod reschedule;
pub mod scheduler;

pub use sw_common::{EngineError, Result};

pub use estimate::{estimate, Estimate};
pub use gateway::{LoggingGateway, SendGateway, SendOutcome};
pub use monitor::{BatchMonitor, BatchSummary, DashboardStats};
pub use planner::{BatchPlanner, PlanOutcome};
pub use recovery::{recover, RecoveryReport};
pub use reschedule::{RescheduleController, RescheduleReport};
pub use scheduler::{DispatchScheduler, SchedulerConfig};
