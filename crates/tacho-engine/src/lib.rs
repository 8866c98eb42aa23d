//! Driving-time compliance engine.
//!
//! Control flow per request: the lifecycle mutates sessions, the aggregator
//! recomputes the driving totals, the rules classify them, and the advisor
//! optionally attaches a nearby truck park.

pub mod advisory;
pub mod aggregator;
pub mod error;
pub mod http_locator;
pub mod lifecycle;
pub mod rules;
pub mod service;

pub use advisory::{BreakAdvice, BreakAdvisor};
pub use aggregator::{DrivingTotals, LocalCalendar, RollingWindowAggregator, Window};
pub use error::ComplianceError;
pub use http_locator::HttpParkingLocator;
pub use lifecycle::SessionLifecycle;
pub use rules::evaluate;
pub use service::{ComplianceEngine, DailySummary, DrivingHistory, EngineConfig};
