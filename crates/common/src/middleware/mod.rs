//! Request middlewares, listed in the order the server installs them
//! (outermost first).

pub mod error_handler;
pub mod request_id;
pub mod request_logger;
pub mod db_session;
pub mod cors;
pub mod timeout;

pub use cors::cors;
pub use db_session::db_session;
pub use error_handler::{error_handler, not_found};
pub use request_id::request_id;
pub use request_logger::request_logger;
pub use timeout::{REQUEST_TIMEOUT, timeout};
