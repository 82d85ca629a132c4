//! Collaborateur de récupération réseau/fichier
//!
//! La fabrique traite ce collaborateur comme une boîte noire : une URL (ou
//! un chemin local via `file://`) devient des octets bruts, ou un échec. Le
//! mode `quiet` abaisse la journalisation de l'échec, le résultat nul est
//! identique dans les deux cas.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Erreurs de récupération d'octets distants ou locaux.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid file URL '{0}'")]
    InvalidFileUrl(String),
}

/// Résolution synchrone (du point de vue de l'appelant) d'une URL en octets.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, locator: &Url, quiet: bool) -> Result<Bytes, FetchError>;
}

/// Fetcher par défaut : reqwest pour http/https, tokio::fs pour file://.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("cannot configure HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn fetch_impl(&self, locator: &Url) -> Result<Bytes, FetchError> {
        match locator.scheme() {
            "http" | "https" => {
                let response = self
                    .client
                    .get(locator.as_str())
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.bytes().await?)
            }
            "file" => {
                let path = locator
                    .to_file_path()
                    .map_err(|_| FetchError::InvalidFileUrl(locator.to_string()))?;
                Ok(Bytes::from(tokio::fs::read(path).await?))
            }
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, locator: &Url, quiet: bool) -> Result<Bytes, FetchError> {
        let result = self.fetch_impl(locator).await;
        if let Err(ref e) = result {
            if quiet {
                tracing::debug!("cannot fetch {}: {}", locator, e);
            } else {
                tracing::warn!("cannot fetch {}: {}", locator, e);
            }
        }
        result
    }
}
