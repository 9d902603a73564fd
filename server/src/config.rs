//! Server configuration

use shared::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind the framed TCP listener to
    pub host: String,
    pub port: u16,
    /// Largest frame payload accepted before the connection is dropped
    pub max_frame_size: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
