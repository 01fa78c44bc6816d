pub mod amount;
pub mod analyzer;
pub mod error;
pub mod orchestrator;
pub mod refunds;
pub mod schedule;
pub mod session;
