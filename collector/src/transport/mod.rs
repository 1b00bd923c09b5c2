pub mod http;

pub use http::routes::AppState;
pub use http::server::{serve, ServerConfig};
