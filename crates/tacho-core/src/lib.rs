pub mod errors;
pub mod ids;
pub mod location;
pub mod session;
pub mod snapshot;

pub use errors::{CoordinateError, LocatorError};
pub use ids::{DriverId, DrivingSessionId, ParkingId};
pub use location::{GeoPoint, NoopParkingLocator, ParkingLocator, ParkingSummary};
pub use session::{DrivingSession, Violation, ViolationRule};
pub use snapshot::ComplianceSnapshot;
