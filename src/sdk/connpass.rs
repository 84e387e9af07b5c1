//! HTTP client for the connpass event directory API (v2).

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sdk::gemini::{handle_response, user_agent};
use crate::sdk::types::EventsResponse;

/// Which per-user event list to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEventKind {
    Attended,
    Presenter,
}

impl UserEventKind {
    fn path(self) -> &'static str {
        match self {
            Self::Attended => "attended_events",
            Self::Presenter => "presenter_events",
        }
    }
}

/// Client for connpass user endpoints.
#[derive(Debug, Clone)]
pub struct ConnpassClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl ConnpassClient {
    /// Create a client from the configuration snapshot.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(config.upstream_timeout))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.connpass_api_url.trim_end_matches('/').to_string(),
            api_key: config.connpass_api_key.clone(),
        })
    }

    /// The endpoint URL for a user's event list.
    pub fn user_events_url(&self, kind: UserEventKind, nickname: &str, count: u32) -> String {
        format!(
            "{}/users/{}/{}/?count={}",
            self.api_url,
            utf8_percent_encode(nickname, NON_ALPHANUMERIC),
            kind.path(),
            count
        )
    }

    /// Fetch events a user attended or presented at.
    pub async fn user_events(
        &self,
        kind: UserEventKind,
        nickname: &str,
        count: u32,
    ) -> Result<EventsResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::MissingCredential("CONNPASS_API_KEY is not set".to_string()))?;

        let url = self.user_events_url(kind, nickname, count);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-API-Key", api_key)
            .send()
            .await?;

        handle_response(response).await
    }
}
