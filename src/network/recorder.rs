//! Match Recorder
//!
//! Reports completed matches to the web application's match history
//! endpoint. Calls are fire-and-forget: each runs in its own detached
//! task, failures are logged and nothing is retried.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::clock::to_datetime;
use crate::game::state::MatchRecord;

/// Game name expected by the match history endpoint.
pub const GAME_NAME: &str = "web3d";

/// Recorder configuration.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Base URL of the web application.
    pub api_url: String,
    /// Shared secret sent as `X-Internal-Key`. Recording is skipped when unset.
    pub internal_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            internal_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl RecorderConfig {
    /// Create config from any key/value source (`API_URL`, `INTERNAL_API_KEY`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: lookup("API_URL").unwrap_or(defaults.api_url),
            internal_key: lookup("INTERNAL_API_KEY").filter(|k| !k.is_empty()),
            timeout: defaults.timeout,
        }
    }

    /// Check if recording is configured.
    pub fn is_configured(&self) -> bool {
        self.internal_key.is_some()
    }

    /// Full endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}/api/matches", self.api_url.trim_end_matches('/'))
    }
}

/// Recorder errors.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// No internal key configured.
    #[error("INTERNAL_API_KEY not configured")]
    NotConfigured,

    /// Request could not be sent or timed out.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with an error status.
    #[error("match rejected with HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error text from the response body, if any.
        message: String,
    },
}

/// Request body of `POST /api/matches`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    /// Always [`GAME_NAME`].
    pub game: &'static str,
    /// Player ids, parallel to `scores`.
    pub player_ids: Vec<u32>,
    /// Final scores.
    pub scores: Vec<u32>,
    /// Highest scorer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<u32>,
    /// RFC 3339 start of the active phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl From<&MatchRecord> for MatchReport {
    fn from(record: &MatchRecord) -> Self {
        Self {
            game: GAME_NAME,
            player_ids: record.player_ids.iter().map(|id| id.0).collect(),
            scores: record.scores.clone(),
            winner_id: record.winner.map(|id| id.0),
            started_at: to_datetime(record.started_at).map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedBody {
    match_id: Option<serde_json::Value>,
}

/// HTTP client for the match history endpoint.
#[derive(Clone, Debug)]
pub struct MatchRecorder {
    client: reqwest::Client,
    config: RecorderConfig,
}

impl MatchRecorder {
    /// Create a recorder.
    pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Recorder configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Post one match and wait for the answer.
    pub async fn record(&self, record: &MatchRecord) -> Result<(), RecorderError> {
        let key = self.config.internal_key.as_deref().ok_or(RecorderError::NotConfigured)?;
        let report = MatchReport::from(record);

        let response = self
            .client
            .post(self.config.endpoint())
            .header("X-Internal-Key", key)
            .json(&report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(RecorderError::Rejected { status: status.as_u16(), message });
        }

        let match_id = response.json::<CreatedBody>().await.ok().and_then(|b| b.match_id);
        info!("Recorded match {:?} for players {:?}", match_id, report.player_ids);
        Ok(())
    }

    /// Post one match on a detached task. Never blocks the caller.
    pub fn spawn_record(&self, record: MatchRecord) {
        if !self.config.is_configured() {
            warn!("Match not recorded: {}", RecorderError::NotConfigured);
            return;
        }

        let recorder = self.clone();
        debug!("Recording match with {} players", record.player_ids.len());
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&record).await {
                warn!("Failed to record match: {}", e);
            }
        });
    }
}
