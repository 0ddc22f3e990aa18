// Dashboard aggregator for the procurement workflow engine
//
// Derives cross-workflow statistics from current engine state. Read-only.

pub mod aggregator;
pub mod types;

pub use aggregator::summarize;
pub use types::{DashboardStats, StatusCounts, UpcomingMilestone};
