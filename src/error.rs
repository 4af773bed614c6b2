//! Error types for CODESYS MCP Server

use thiserror::Error;

/// Result type alias for CODESYS MCP Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for CODESYS MCP Server
#[derive(Error, Debug)]
pub enum Error {
    /// CODESYS executable missing or not configured
    #[error("{path} not found")]
    ExecutableNotFound { path: String },

    /// OS refused to start the executable
    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Temporary script could not be created or written
    #[error("Failed to write script file: {0}")]
    ScriptFile(#[source] std::io::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource URI not served by this server
    #[error("Unknown resource: {uri}")]
    UnknownResource { uri: String },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (temp paths, OS error text) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::ExecutableNotFound { path } => format!("{} not found", path),
            Error::Spawn { .. } => "Failed to start CODESYS".to_string(),
            Error::ScriptFile(_) => "Failed to write script file".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::UnknownResource { uri } => format!("Unknown resource: {}", uri),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_os_details() {
        let err = Error::Spawn {
            path: "/opt/codesys/CODESYS.exe".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "EACCES"),
        };
        assert_eq!(err.client_message(), "Failed to start CODESYS");
        assert!(err.to_string().contains("EACCES"));
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::ExecutableNotFound {
            path: "CODESYS.exe".to_string(),
        };
        assert_eq!(err.client_message(), "CODESYS.exe not found");
        assert_eq!(err.to_string(), "CODESYS.exe not found");
    }
}
