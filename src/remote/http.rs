// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP client for the ticket history endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{RemoteTicketSource, TicketHistory};
use crate::error::SyncError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct HttpTicketSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTicketSource {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn history_url(&self, user_id: &str) -> String {
        format!(
            "{}/users/{}/tickets/history",
            self.base_url.trim_end_matches('/'),
            user_id
        )
    }
}

/// Map a non-success status onto the sync error taxonomy.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(detail),
        _ => SyncError::Network(format!("ticket history request failed ({detail})")),
    }
}

#[async_trait]
impl RemoteTicketSource for HttpTicketSource {
    async fn fetch_history(&self, user_id: &str, auth_token: &str) -> Result<TicketHistory, SyncError> {
        let url = self.history_url(user_id);
        debug!(user_id, url = %url, "Fetching ticket history");

        let response = self
            .client
            .get(&url)
            .bearer_auth(auth_token)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("ticket history request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TicketHistory>()
                .await
                .map_err(|e| SyncError::Network(format!("invalid ticket history response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}
