use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RubyfyError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },
    #[error("Failed to execute remote command: {0}")]
    Exec(String),
    #[error("Failed to transfer {path}: {reason}")]
    Transfer { path: String, reason: String },
    #[error("SSH session error: {0}")]
    Ssh(#[from] openssh::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to parse config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
