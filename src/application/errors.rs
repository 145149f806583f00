//! Application layer errors

use thiserror::Error;

use crate::application::messaging::permission::TrustTier;

/// Host-level errors raised by registry and plugin lifecycle operations
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin not instantiated: {0}")]
    PluginNotInstantiated(String),

    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Plugin '{plugin}' is already bound to account {account}")]
    AlreadyBound { plugin: String, account: String },

    #[error("Plugin '{plugin}' is not bound to account {account}")]
    NotBound { plugin: String, account: String },

    #[error("Account undefined: {0}")]
    AccountUndefined(String),

    #[error("Plugin undefined: {0}")]
    PluginUndefined(String),

    #[error("Plugin destroyed: {0}")]
    PluginDestroyed(String),

    #[error("Invalid command pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("No async runtime to run job {job}: {reason}")]
    NoRuntime { job: String, reason: String },

    #[error("Plugin '{plugin}' destroyed with {} unbind failure(s): {}", failures.len(), failures.join("; "))]
    DestroyIncomplete { plugin: String, failures: Vec<String> },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Command-level errors. These never leave the dispatch boundary; they are
/// turned into a reply to the originating conversation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Missing argument: {0}")]
    ArgumentMissing(String),

    #[error("Insufficient permission (requires tier {required}, you have {actual})")]
    InsufficientPermission { required: TrustTier, actual: TrustTier },
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_display() {
        let err = HostError::AlreadyBound {
            plugin: "weather".to_string(),
            account: "10001".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Plugin 'weather' is already bound to account 10001"
        );
    }

    #[test]
    fn test_argument_missing_names_label() {
        let err = CommandError::ArgumentMissing("value".to_string());
        assert_eq!(err.to_string(), "Missing argument: value");
    }

    #[test]
    fn test_destroy_incomplete_lists_failures() {
        let err = HostError::DestroyIncomplete {
            plugin: "p".to_string(),
            failures: vec!["a: boom".to_string(), "b: bang".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 unbind failure(s)"));
        assert!(msg.contains("a: boom; b: bang"));
    }

    #[test]
    fn test_storage_error_converts_into_host_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HostError = StorageError::from(io).into();
        assert!(matches!(err, HostError::Storage(StorageError::Io(_))));
    }
}
