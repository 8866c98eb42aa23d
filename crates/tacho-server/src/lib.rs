pub mod error;
pub mod handlers;
pub mod identity;
pub mod rpc;
pub mod server;

pub use error::ApiError;
pub use handlers::HandlerState;
pub use identity::{DriverIdentity, DRIVER_ID_HEADER};
pub use server::{build_router, start, ServerConfig, ServerHandle};
