// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical ticket model.
//!
//! A [`Ticket`] is a shared envelope (id, owner, payment, passengers, sync
//! metadata) around a tagged [`Trip`]: either an urban zone ticket or an
//! interurban scheduled-trip ticket. Status derivation and formatting
//! dispatch on the tag.
//!
//! Tickets are replaced wholesale on merge; nothing mutates individual fields
//! of a cached ticket except the local `pending_update` marker.

pub mod normalize;
pub mod status;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One cached ticket.
///
/// # Example
///
/// ```
/// use ticket_sync::ticket::{Ticket, Trip, UrbanTrip, TicketCore};
///
/// let ticket = Ticket::new(
///     "t1",
///     TicketCore { operator: Some("Dem Dikk".into()), ..Default::default() },
///     Trip::Urban(UrbanTrip {
///         origin_zone: Some("Zone 1".into()),
///         destination_zone: Some("Zone 3".into()),
///         departure_at: None,
///     }),
/// );
/// assert!(ticket.is_urban());
/// assert_eq!(ticket.route_label(), "Dem Dikk: Zone 1 → Zone 3");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    /// Owner as reported by the server, if the payload carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub booked_at: Option<DateTime<Utc>>,
    pub core: TicketCore,
    pub trip: Trip,
    #[serde(default)]
    pub payment: PaymentInfo,
    #[serde(default)]
    pub passengers: Vec<Passenger>,
    #[serde(default)]
    pub sync: SyncMetadata,
}

/// Server-issued ticket facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketCore {
    #[serde(default)]
    pub code: Option<String>,
    /// Status string as last reported by the server (free-form).
    #[serde(default)]
    pub server_status: Option<String>,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub zone_type: Option<String>,
    #[serde(default)]
    pub class_type: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trip {
    Urban(UrbanTrip),
    Interurban(InterurbanTrip),
}

/// Zone-priced ticket (BRT, TER, Dem Dikk).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrbanTrip {
    #[serde(default)]
    pub origin_zone: Option<String>,
    #[serde(default)]
    pub destination_zone: Option<String>,
    /// Scheduled boarding time, when the operator sells timed departures.
    #[serde(default)]
    pub departure_at: Option<DateTime<Utc>>,
}

/// Scheduled-trip ticket (bus, train, plane).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterurbanTrip {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub travel_date: Option<NaiveDate>,
    /// Scheduled clock time on `travel_date`.
    #[serde(default)]
    pub departure_time: Option<NaiveTime>,
    #[serde(default)]
    pub departure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seat: Option<String>,
    #[serde(default)]
    pub mode: TransportMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Bus,
    Train,
    Plane,
    #[default]
    Other,
}

impl TransportMode {
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bus" | "car" | "coach" => Self::Bus,
            "train" | "rail" => Self::Train,
            "plane" | "flight" | "air" => Self::Plane,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub seat: Option<String>,
}

/// Local provenance of a cached ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// First time this id was observed locally. Write-once.
    #[serde(default)]
    pub cached_at: DateTime<Utc>,
    /// Last merge that touched this id.
    #[serde(default)]
    pub last_synced_at: DateTime<Utc>,
    /// Set after a server mutation that has not been reconciled by a fetch.
    #[serde(default)]
    pub pending_update: bool,
}

/// Recognized ticket operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Brt,
    DemDikk,
    Ter,
    Other(String),
}

impl Operator {
    /// Recognize an operator from a free-form display name.
    ///
    /// ```
    /// use ticket_sync::ticket::Operator;
    ///
    /// assert_eq!(Operator::from_name("Dem Dikk"), Operator::DemDikk);
    /// assert_eq!(Operator::from_name("SUNU BRT"), Operator::Brt);
    /// assert_eq!(Operator::from_name("TER Dakar"), Operator::Ter);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let key: String = name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if key.contains("demdikk") || key == "ddd" {
            Self::DemDikk
        } else if key.contains("brt") {
            Self::Brt
        } else if key == "ter" || key.starts_with("terdakar") || key.contains("trainexpressregional") {
            Self::Ter
        } else {
            Self::Other(name.trim().to_string())
        }
    }

    /// How long an urban ticket stays valid after its departure reference.
    #[must_use]
    pub fn urban_validity(&self) -> Duration {
        match self {
            Self::Brt | Self::DemDikk => Duration::hours(1),
            Self::Ter | Self::Other(_) => Duration::hours(2),
        }
    }

    /// Operators whose pending tickets are activated on board.
    #[must_use]
    pub fn activates_on_board(&self) -> bool {
        matches!(self, Self::Brt | Self::DemDikk)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Brt => write!(f, "BRT"),
            Self::DemDikk => write!(f, "Dem Dikk"),
            Self::Ter => write!(f, "TER"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

impl Ticket {
    /// Create a ticket with empty payment, passengers and sync metadata.
    pub fn new(id: impl Into<String>, core: TicketCore, trip: Trip) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            booked_at: None,
            core,
            trip,
            payment: PaymentInfo::default(),
            passengers: Vec::new(),
            sync: SyncMetadata::default(),
        }
    }

    #[must_use]
    pub fn is_urban(&self) -> bool {
        matches!(self.trip, Trip::Urban(_))
    }

    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self.trip {
            Trip::Urban(_) => "urban",
            Trip::Interurban(_) => "interurban",
        }
    }

    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        self.core
            .operator
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(Operator::from_name)
    }

    /// Scheduled travel moment, if the trip carries one.
    #[must_use]
    pub fn trip_date(&self) -> Option<DateTime<Utc>> {
        match &self.trip {
            Trip::Urban(urban) => urban.departure_at,
            Trip::Interurban(trip) => match (trip.travel_date, trip.departure_time) {
                (Some(date), Some(time)) => Some(date.and_time(time).and_utc()),
                (Some(date), None) => trip
                    .departure_at
                    .or_else(|| date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())),
                (None, _) => trip.departure_at,
            },
        }
    }

    /// Ordering key: trip date, else booking date, else first local observation.
    #[must_use]
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.trip_date()
            .or(self.booked_at)
            .unwrap_or(self.sync.cached_at)
    }

    /// Human-readable route, formatted per ticket kind.
    #[must_use]
    pub fn route_label(&self) -> String {
        let unknown = "?";
        match &self.trip {
            Trip::Urban(urban) => {
                let from = urban.origin_zone.as_deref().unwrap_or(unknown);
                let to = urban.destination_zone.as_deref().unwrap_or(unknown);
                match self.operator() {
                    Some(op) => format!("{}: {} → {}", op, from, to),
                    None => format!("{} → {}", from, to),
                }
            }
            Trip::Interurban(trip) => {
                let from = trip.origin.as_deref().unwrap_or(unknown);
                let to = trip.destination.as_deref().unwrap_or(unknown);
                format!("{} → {}", from, to)
            }
        }
    }
}

/// Sort tickets newest first by [`Ticket::sort_key`], ties broken by id.
pub fn sort_tickets(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| {
        b.sort_key()
            .cmp(&a.sort_key())
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn urban(id: &str, operator: &str) -> Ticket {
        Ticket::new(
            id,
            TicketCore {
                operator: Some(operator.to_string()),
                server_status: Some("Valid".into()),
                ..Default::default()
            },
            Trip::Urban(UrbanTrip::default()),
        )
    }

    pub fn interurban(id: &str) -> Ticket {
        Ticket::new(
            id,
            TicketCore {
                server_status: Some("confirmed".into()),
                ..Default::default()
            },
            Trip::Interurban(InterurbanTrip::default()),
        )
    }

    pub fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }
}
