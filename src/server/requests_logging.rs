//! Request logging middleware

use axum::extract::State;
use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{info, warn};

use super::state::ServerState;

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();
    let method = request.method().to_string();
    let uri = request.uri().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, uri);
    }
    if level >= RequestsLoggingLevel::Headers {
        for (name, value) in request.headers().iter() {
            info!("    {:?}: {:?}", name, value);
        }
    }

    let response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        for (name, value) in response.headers().iter() {
            info!("    {:?}: {:?}", name, value);
        }
    }

    let elapsed_ms = start.elapsed().as_millis();
    let status = response.status();
    if status.is_server_error() {
        warn!("<<< {} {} {} ({}ms)", status.as_u16(), method, uri, elapsed_ms);
    } else if level > RequestsLoggingLevel::None {
        info!("<<< {} {} {} ({}ms)", status.as_u16(), method, uri, elapsed_ms);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::RequestsLoggingLevel;
    use clap::ValueEnum;

    #[test]
    fn levels_are_ordered_by_verbosity() {
        assert!(RequestsLoggingLevel::None < RequestsLoggingLevel::Path);
        assert!(RequestsLoggingLevel::Path < RequestsLoggingLevel::Headers);
        assert_eq!(RequestsLoggingLevel::default(), RequestsLoggingLevel::Path);
    }

    #[test]
    fn parses_cli_values() {
        assert_eq!(
            RequestsLoggingLevel::from_str("headers", true).unwrap(),
            RequestsLoggingLevel::Headers
        );
        assert!(RequestsLoggingLevel::from_str("body", true).is_err());
    }
}
