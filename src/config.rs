use color_eyre::eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{credentials::PreparationFailure, identity::Identity, upload::UploadOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Hosted backend deployment, e.g. `https://happy-otter-123.convex.cloud`.
    /// When unset, records are kept in a local file.
    #[serde(default)]
    pub convex_url: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,
}
impl Default for Preferences {
    fn default() -> Self {
        Self {
            convex_url: None,
            collection_id: None,
            chunk_size_bytes: default_chunk_size(),
            retry_delays_secs: default_retry_delays(),
            upload_endpoint: default_upload_endpoint(),
        }
    }
}
impl Preferences {
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            endpoint: self.upload_endpoint.clone(),
            chunk_size: self.chunk_size_bytes.max(1),
            retry_delays: self
                .retry_delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

fn default_chunk_size() -> u64 {
    constants::DEFAULT_CHUNK_SIZE_BYTES
}
fn default_retry_delays() -> Vec<u64> {
    constants::RETRY_DELAYS.iter().map(|d| d.as_secs()).collect()
}
fn default_upload_endpoint() -> String {
    constants::bunny::TUS_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Bearer token for the hosted backend
    #[serde(default)]
    pub auth_token: String,
    /// Identity used against the local backend
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
impl Credentials {
    /// The signed-in identity, if any.
    pub fn identity(&self) -> Option<Identity> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return None;
        }
        Some(Identity {
            subject: subject.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            picture_url: None,
        })
    }
}

/// The directory in which all persistent config data should be stored.
pub fn get_persistent_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| eyre!("Could not find user data directory"))?
        .join(constants::APP_DIR_NAME);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub preferences: Preferences,
}

impl Config {
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::warn!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(config_path).context("Failed to read config file")?;
        let mut config =
            serde_json::from_str::<Config>(&contents).context("Failed to parse config file")?;

        if config.preferences.retry_delays_secs.is_empty() {
            config.preferences.retry_delays_secs = default_retry_delays();
        }
        if config.preferences.chunk_size_bytes == 0 {
            config.preferences.chunk_size_bytes = default_chunk_size();
        }

        Ok(config)
    }

    pub fn get_path() -> Result<PathBuf> {
        Ok(get_persistent_dir()?.join(constants::filename::persistent::CONFIG))
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        tracing::info!("Saving configs to {}", config_path.to_string_lossy());
        fs::write(config_path, serde_json::to_string_pretty(&self)?)?;
        Ok(())
    }
}

/// Server-side configuration of the video hosting provider, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub library_id: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
}
impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            library_id: None,
            api_key: None,
            api_base: constants::bunny::API_BASE.to_string(),
        }
    }
}
impl ProviderConfig {
    pub fn from_env() -> Self {
        use constants::bunny::env;

        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            library_id: var(env::LIBRARY_ID),
            api_key: var(env::API_KEY),
            api_base: var(env::API_BASE).unwrap_or_else(|| constants::bunny::API_BASE.to_string()),
        }
    }

    /// The library id and API key, or a configuration failure naming what is missing.
    pub fn require_credentials(&self) -> Result<(&str, &str), PreparationFailure> {
        match (self.library_id.as_deref(), self.api_key.as_deref()) {
            (Some(library_id), Some(api_key)) => Ok((library_id, api_key)),
            (library_id, api_key) => {
                let missing = [
                    library_id.is_none().then_some(constants::bunny::env::LIBRARY_ID),
                    api_key.is_none().then_some(constants::bunny::env::API_KEY),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ");
                Err(PreparationFailure::Configuration(missing))
            }
        }
    }
}
