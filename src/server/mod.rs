mod album_routes;
pub mod config;
mod download_routes;
pub mod error;
mod library_routes;
mod requests_logging;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use requests_logging::RequestsLoggingLevel;
pub use server::{make_app, run_server};
pub use state::ServerState;
