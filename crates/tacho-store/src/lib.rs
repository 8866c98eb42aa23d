pub mod database;
pub mod error;
pub mod parking;
pub mod row_helpers;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
pub use parking::{ParkingRepo, SeedReport, SqliteParkingLocator};
pub use sessions::{DrivingSessionRepo, SessionStore};
