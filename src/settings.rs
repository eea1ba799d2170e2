use crate::error::StoreError;
use std::env;
use std::path::PathBuf;

pub const CONFIG_FILE: &str = ".ob_config";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const PRIMARY_TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const FALLBACK_TOKEN_VAR: &str = "PAT";
pub const API_URL_VAR: &str = "GITHUB_API_URL";

/// Ambient credentials, captured once so nothing downstream touches the environment.
#[derive(Clone, Default)]
pub struct CredentialSources {
    pub primary: Option<String>,
    pub fallback: Option<String>,
}

impl CredentialSources {
    pub fn from_env() -> Self {
        Self {
            primary: non_empty(env::var(PRIMARY_TOKEN_VAR).ok()),
            fallback: non_empty(env::var(FALLBACK_TOKEN_VAR).ok()),
        }
    }

    /// Picks the explicit token, then the primary variable, then the fallback.
    pub fn resolve(&self, explicit: Option<&str>) -> Option<String> {
        non_empty(explicit.map(str::to_string))
            .or_else(|| self.primary.clone())
            .or_else(|| self.fallback.clone())
    }
}

impl std::fmt::Debug for CredentialSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSources")
            .field("primary", &self.primary.as_ref().map(|_| "<redacted>"))
            .field("fallback", &self.fallback.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub api_url: String,
    pub credentials: CredentialSources,
}

impl Settings {
    /// `config_override` comes from `--config` / `OB_CONFIG`, already merged by clap.
    pub fn from_env(config_override: Option<PathBuf>) -> Result<Self, StoreError> {
        let config_path = match config_override {
            Some(path) => path,
            None => default_config_path()?,
        };
        let api_url = non_empty(env::var(API_URL_VAR).ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Self {
            config_path,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials: CredentialSources::from_env(),
        })
    }
}

pub fn default_config_path() -> Result<PathBuf, StoreError> {
    let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
    Ok(home.join(CONFIG_FILE))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
