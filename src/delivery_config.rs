use std::{fmt, sync::LazyLock};

use regex::Regex;
use url::Url;

use crate::{error::ConfigurationError, DeliveryClient, Result};

/// Firehose delivery stream naming rule.
static STREAM_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.-]{1,64}$").expect("stream name pattern is a valid regex")
});

/// A source of credentials for the ingestion endpoint.
///
/// Sources are tried in the order they appear in [`DeliveryConfig`]; the first usable one wins.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Long-lived access key.
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Temporary credentials with a session token.
    Session {
        access_key_id: String,
        secret_access_key: String,
        session_token: String,
    },
    /// The default provider chain: environment, profile, container or instance identity.
    Ambient,
}

impl CredentialSource {
    fn rank(&self) -> u8 {
        match self {
            CredentialSource::Static { .. } => 0,
            CredentialSource::Session { .. } => 1,
            CredentialSource::Ambient => 2,
        }
    }

    fn resolve(&self) -> Option<ResolvedCredentials> {
        match self {
            CredentialSource::Static {
                access_key_id,
                secret_access_key,
            } if !access_key_id.is_empty() && !secret_access_key.is_empty() => {
                Some(ResolvedCredentials::Explicit {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: None,
                })
            }
            CredentialSource::Session {
                access_key_id,
                secret_access_key,
                session_token,
            } if !access_key_id.is_empty()
                && !secret_access_key.is_empty()
                && !session_token.is_empty() =>
            {
                Some(ResolvedCredentials::Explicit {
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    session_token: Some(session_token.clone()),
                })
            }
            CredentialSource::Ambient => Some(ResolvedCredentials::Ambient),
            _ => None,
        }
    }
}

// Secrets must not end up in logs.
impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
            CredentialSource::Session { access_key_id, .. } => f
                .debug_struct("Session")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
            CredentialSource::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Credentials selected from the configured sources.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredentials {
    Explicit {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    Ambient,
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCredentials::Explicit {
                access_key_id,
                session_token,
                ..
            } => f
                .debug_struct("Explicit")
                .field("access_key_id", access_key_id)
                .field("has_session_token", &session_token.is_some())
                .finish_non_exhaustive(),
            ResolvedCredentials::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Validated delivery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDelivery {
    pub stream_name: String,
    pub region: String,
    pub endpoint_url: Option<Url>,
    pub credentials: ResolvedCredentials,
}

/// Configuration for [`DeliveryClient`].
#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    pub(crate) stream_name: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) endpoint_url: Option<String>,
    pub(crate) credentials: Vec<CredentialSource>,
}

impl DeliveryConfig {
    /// Region used when none is configured.
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Create an empty configuration. A stream name has to be set before creating a client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from process environment variables.
    ///
    /// See [`DeliveryConfig::from_env_with`] for the variables read.
    pub fn from_env() -> Self {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Create a configuration from variables provided by `lookup`.
    ///
    /// Reads `FIREHOSE_STREAM_NAME`, `AWS_REGION` (or `AWS_DEFAULT_REGION`), `AWS_ENDPOINT_URL`,
    /// and `FIREHOSE_ACCESS_KEY_ID`/`FIREHOSE_SECRET_ACCESS_KEY`/`FIREHOSE_SESSION_TOKEN`.
    /// The ambient provider chain is always appended as the last credential source.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let mut config = DeliveryConfig::new();
        config.stream_name = var("FIREHOSE_STREAM_NAME");
        config.region = var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION"));
        config.endpoint_url = var("AWS_ENDPOINT_URL");

        if let (Some(access_key_id), Some(secret_access_key)) = (
            var("FIREHOSE_ACCESS_KEY_ID"),
            var("FIREHOSE_SECRET_ACCESS_KEY"),
        ) {
            match var("FIREHOSE_SESSION_TOKEN") {
                Some(session_token) => {
                    config.session_credentials(access_key_id, secret_access_key, session_token)
                }
                None => config.static_credentials(access_key_id, secret_access_key),
            };
        }
        config.ambient_credentials();

        config
    }

    /// Set the delivery stream name. Overrides any previously configured name.
    pub fn stream_name(&mut self, stream_name: impl Into<String>) -> &mut Self {
        self.stream_name = Some(stream_name.into());
        self
    }

    pub fn region(&mut self, region: impl Into<String>) -> &mut Self {
        self.region = Some(region.into());
        self
    }

    /// Override the ingestion endpoint URL (e.g. a local Firehose emulator).
    pub fn endpoint_url(&mut self, endpoint_url: impl Into<String>) -> &mut Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Add a static access key. Static keys are tried before session and ambient credentials.
    pub fn static_credentials(
        &mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> &mut Self {
        self.add_credentials(CredentialSource::Static {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        })
    }

    /// Add temporary session credentials. They are tried after static and before ambient ones.
    pub fn session_credentials(
        &mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> &mut Self {
        self.add_credentials(CredentialSource::Session {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
        })
    }

    /// Fall back to the ambient provider chain.
    pub fn ambient_credentials(&mut self) -> &mut Self {
        self.add_credentials(CredentialSource::Ambient)
    }

    /// Replace credential sources with `sources`, tried in exactly the given order.
    pub fn credential_sources(&mut self, sources: Vec<CredentialSource>) -> &mut Self {
        self.credentials = sources;
        self
    }

    fn add_credentials(&mut self, source: CredentialSource) -> &mut Self {
        if !self.credentials.contains(&source) {
            self.credentials.push(source);
            // Stable sort keeps insertion order within the same kind of source.
            self.credentials.sort_by_key(CredentialSource::rank);
        }
        self
    }

    /// Validate the configuration and pick credentials.
    pub fn resolve(&self) -> Result<ResolvedDelivery> {
        let stream_name = self
            .stream_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or(ConfigurationError::MissingStreamName)?;

        if !STREAM_NAME_RE.is_match(&stream_name) {
            return Err(ConfigurationError::InvalidStreamName(stream_name).into());
        }

        let endpoint_url = self
            .endpoint_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConfigurationError::InvalidEndpoint)?;

        let credentials = self
            .credentials
            .iter()
            .find_map(|source| {
                let resolved = source.resolve();
                if resolved.is_none() {
                    log::warn!(target: "experiment_firehose",
                               source:? = source;
                               "skipping incomplete credential source");
                }
                resolved
            })
            .unwrap_or(ResolvedCredentials::Ambient);

        Ok(ResolvedDelivery {
            stream_name,
            region: self
                .region
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_REGION.to_owned()),
            endpoint_url,
            credentials,
        })
    }

    /// Create a new [`DeliveryClient`] shipping records to Amazon Data Firehose.
    pub fn to_client(&self) -> Result<DeliveryClient> {
        DeliveryClient::new(self)
    }
}
