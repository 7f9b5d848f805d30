// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote ticket history and session credentials.
//!
//! The server returns a user's history split four ways: upcoming and past,
//! each with urban and interurban entries. Entries are loosely typed; see
//! [`crate::ticket::normalize`] for the conversion into [`crate::Ticket`].

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

pub use http::HttpTicketSource;

/// Authoritative ticket history for one user.
#[async_trait]
pub trait RemoteTicketSource: Send + Sync {
    /// Fetch the full history.
    ///
    /// Must return [`SyncError::Auth`] for rejected credentials (401/403) and
    /// [`SyncError::Network`] for every other failure.
    async fn fetch_history(&self, user_id: &str, auth_token: &str) -> Result<TicketHistory, SyncError>;
}

/// Source of the current bearer credential.
///
/// The engine never refreshes tokens itself; an absent token is an auth error.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// Fixed credential, for embedding apps that manage tokens elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }

    /// A session without credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Response of the history endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketHistory {
    #[serde(default)]
    pub upcoming: TicketGroup,
    #[serde(default)]
    pub past: TicketGroup,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketGroup {
    #[serde(default)]
    pub urban: Vec<RawUrbanTicket>,
    #[serde(default)]
    pub interurban: Vec<RawInterurbanTicket>,
}

impl TicketHistory {
    /// Total entries across the four groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upcoming.urban.len()
            + self.upcoming.interurban.len()
            + self.past.urban.len()
            + self.past.interurban.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Urban entry as served. Timestamps stay strings until normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUrbanTicket {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub zone_type: Option<String>,
    #[serde(default)]
    pub class_type: Option<String>,
    #[serde(default)]
    pub origin_zone: Option<String>,
    #[serde(default)]
    pub destination_zone: Option<String>,
    #[serde(default)]
    pub departure_at: Option<String>,
    #[serde(default)]
    pub validated_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub booked_at: Option<String>,
    #[serde(default)]
    pub payment: Option<RawPayment>,
    #[serde(default)]
    pub passengers: Vec<RawPassenger>,
}

/// Interurban entry as served.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInterurbanTicket {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub class_type: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub travel_date: Option<String>,
    /// `HH:MM` or `HH:MM:SS`
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub departure_at: Option<String>,
    #[serde(default)]
    pub seat: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub validated_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub booked_at: Option<String>,
    #[serde(default)]
    pub payment: Option<RawPayment>,
    #[serde(default)]
    pub passengers: Vec<RawPassenger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPayment {
    /// Number or numeric string.
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPassenger {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub seat: Option<String>,
}
