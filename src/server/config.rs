use super::RequestsLoggingLevel;

#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    pub port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
}
