use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config file not found at {}: run 'ob init' first", path.display())]
    ConfigMissing { path: PathBuf },

    #[error("alias '{0}' already exists")]
    AliasExists(String),

    #[error("alias '{0}' does not exist")]
    AliasNotFound(String),

    #[error("issue number must be a positive integer")]
    InvalidIssueNumber,

    #[error("invalid entry '{alias}' in config file: {reason}")]
    InvalidEntry { alias: String, reason: String },

    #[error("home directory not found: pass --config or set OB_CONFIG")]
    HomeNotFound,

    #[error(
        "failed to parse config file {}: {source}\n\
         If this file was written by the older INI-based ob, re-create it with \
         'ob init' and 'ob table add'.",
        path.display()
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "GitHub token not found: pass --token or set the GITHUB_TOKEN/PAT environment variable"
    )]
    CredentialMissing,

    #[error("invalid repository '{0}': expected owner/name")]
    InvalidRepository(String),

    #[error("API request failed: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("GitHub token contains characters not allowed in an HTTP header")]
    InvalidCredential,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("provide a repository and issue number, or use --alias")]
    InsufficientArguments,
}
