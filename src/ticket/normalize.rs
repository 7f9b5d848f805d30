// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Normalization of served history entries into canonical [`Ticket`]s.
//!
//! Parsing is lenient: an unparseable timestamp, date or clock time becomes
//! absent rather than failing the whole batch. Entries without an id are
//! dropped and counted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::{
    InterurbanTrip, Passenger, PaymentInfo, Ticket, TicketCore, TransportMode, Trip, UrbanTrip,
};
use crate::remote::{RawInterurbanTicket, RawPassenger, RawPayment, RawUrbanTicket, TicketHistory};

/// Per-group counts from one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub upcoming_urban: usize,
    pub upcoming_interurban: usize,
    pub past_urban: usize,
    pub past_interurban: usize,
    /// Entries without a usable id.
    pub dropped: usize,
}

impl NormalizeReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.upcoming_urban + self.upcoming_interurban + self.past_urban + self.past_interurban
    }
}

/// Convert a full history response. Upcoming entries come first, then past.
pub fn normalize_history(history: TicketHistory) -> (Vec<Ticket>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut tickets = Vec::with_capacity(history.len());

    let TicketHistory { upcoming, past } = history;

    for raw in upcoming.urban {
        match normalize_urban(raw) {
            Some(t) => {
                report.upcoming_urban += 1;
                tickets.push(t);
            }
            None => report.dropped += 1,
        }
    }
    for raw in upcoming.interurban {
        match normalize_interurban(raw) {
            Some(t) => {
                report.upcoming_interurban += 1;
                tickets.push(t);
            }
            None => report.dropped += 1,
        }
    }
    for raw in past.urban {
        match normalize_urban(raw) {
            Some(t) => {
                report.past_urban += 1;
                tickets.push(t);
            }
            None => report.dropped += 1,
        }
    }
    for raw in past.interurban {
        match normalize_interurban(raw) {
            Some(t) => {
                report.past_interurban += 1;
                tickets.push(t);
            }
            None => report.dropped += 1,
        }
    }

    (tickets, report)
}

pub fn normalize_urban(raw: RawUrbanTicket) -> Option<Ticket> {
    let Some(id) = raw.id.as_ref().and_then(id_string) else {
        debug!("Dropping urban entry without id");
        return None;
    };

    Some(Ticket {
        id,
        user_id: raw.user_id.as_ref().and_then(id_string),
        booked_at: raw.booked_at.as_deref().and_then(parse_timestamp),
        core: TicketCore {
            code: clean(raw.code),
            server_status: clean(raw.status),
            validated_at: raw.validated_at.as_deref().and_then(parse_timestamp),
            expires_at: raw.expires_at.as_deref().and_then(parse_timestamp),
            zone_type: clean(raw.zone_type),
            class_type: clean(raw.class_type),
            operator: clean(raw.operator),
        },
        trip: Trip::Urban(UrbanTrip {
            origin_zone: clean(raw.origin_zone),
            destination_zone: clean(raw.destination_zone),
            departure_at: raw.departure_at.as_deref().and_then(parse_timestamp),
        }),
        payment: payment(raw.payment),
        passengers: passengers(raw.passengers),
        sync: Default::default(),
    })
}

pub fn normalize_interurban(raw: RawInterurbanTicket) -> Option<Ticket> {
    let Some(id) = raw.id.as_ref().and_then(id_string) else {
        debug!("Dropping interurban entry without id");
        return None;
    };

    Some(Ticket {
        id,
        user_id: raw.user_id.as_ref().and_then(id_string),
        booked_at: raw.booked_at.as_deref().and_then(parse_timestamp),
        core: TicketCore {
            code: clean(raw.code),
            server_status: clean(raw.status),
            validated_at: raw.validated_at.as_deref().and_then(parse_timestamp),
            expires_at: raw.expires_at.as_deref().and_then(parse_timestamp),
            zone_type: None,
            class_type: clean(raw.class_type),
            operator: clean(raw.operator),
        },
        trip: Trip::Interurban(InterurbanTrip {
            origin: clean(raw.origin),
            destination: clean(raw.destination),
            travel_date: raw.travel_date.as_deref().and_then(parse_date),
            departure_time: raw.departure_time.as_deref().and_then(parse_clock_time),
            departure_at: raw.departure_at.as_deref().and_then(parse_timestamp),
            seat: clean(raw.seat),
            mode: raw
                .mode
                .as_deref()
                .map(TransportMode::from_label)
                .unwrap_or_default(),
        }),
        payment: payment(raw.payment),
        passengers: passengers(raw.passengers),
        sync: Default::default(),
    })
}

/// RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` read as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `YYYY-MM-DD`, also accepting a full timestamp (its date part).
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|dt| dt.date_naive()))
}

/// `HH:MM:SS`, `HH:MM` or `HHhMM`.
#[must_use]
pub fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M", "%Hh%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn payment(raw: Option<RawPayment>) -> PaymentInfo {
    let Some(raw) = raw else {
        return PaymentInfo::default();
    };
    let amount = match raw.amount {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    PaymentInfo {
        amount,
        currency: clean(raw.currency),
        method: clean(raw.method),
        transaction_id: clean(raw.transaction_id),
    }
}

fn passengers(raw: Vec<RawPassenger>) -> Vec<Passenger> {
    raw.into_iter()
        .map(|p| Passenger {
            name: clean(p.name),
            phone: clean(p.phone),
            seat: clean(p.seat),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TicketGroup;
    use serde_json::json;

    #[test]
    fn test_normalize_groups_and_counts() {
        let history: TicketHistory = serde_json::from_value(json!({
            "upcoming": {
                "urban": [ { "id": "u1", "operator": "BRT", "status": "Valid" } ],
                "interurban": [ { "id": 77, "origin": "Dakar", "destination": "Thiès", "mode": "bus" } ]
            },
            "past": {
                "urban": [ { "status": "used" } ],
                "interurban": [ { "id": "i2", "travel_date": "2025-12-24" } ]
            }
        }))
        .unwrap();

        let (tickets, report) = normalize_history(history);
        assert_eq!(report.upcoming_urban, 1);
        assert_eq!(report.upcoming_interurban, 1);
        assert_eq!(report.past_urban, 0);
        assert_eq!(report.past_interurban, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.total(), 3);

        let ids: Vec<_> = tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "77", "i2"]);
        assert!(tickets[0].is_urban());
        match &tickets[1].trip {
            Trip::Interurban(trip) => assert_eq!(trip.mode, TransportMode::Bus),
            Trip::Urban(_) => panic!("expected interurban"),
        }
    }

    #[test]
    fn test_normalize_urban_fields() {
        let raw = RawUrbanTicket {
            id: Some(json!(" t1 ")),
            user_id: Some(json!("u1")),
            status: Some(" Valid ".into()),
            operator: Some("Dem Dikk".into()),
            validated_at: Some("2026-04-01T08:00:00Z".into()),
            departure_at: Some("not a date".into()),
            payment: Some(RawPayment {
                amount: Some(json!("500")),
                method: Some("wave".into()),
                ..Default::default()
            }),
            passengers: vec![RawPassenger { name: Some("Awa".into()), ..Default::default() }],
            ..Default::default()
        };

        let ticket = normalize_urban(raw).unwrap();
        assert_eq!(ticket.id, "t1");
        assert_eq!(ticket.user_id.as_deref(), Some("u1"));
        assert_eq!(ticket.core.server_status.as_deref(), Some("Valid"));
        assert!(ticket.core.validated_at.is_some());
        assert_eq!(ticket.payment.amount, Some(500.0));
        assert_eq!(ticket.passengers.len(), 1);
        match ticket.trip {
            Trip::Urban(urban) => assert!(urban.departure_at.is_none()),
            Trip::Interurban(_) => panic!("expected urban"),
        }
    }

    #[test]
    fn test_numeric_user_id_is_kept() {
        let history: TicketHistory = serde_json::from_value(json!({
            "upcoming": {
                "urban": [ { "id": "t1", "user_id": 42 } ],
                "interurban": [ { "id": "t2", "user_id": " 42 " }, { "id": "t3", "user_id": true } ]
            }
        }))
        .unwrap();

        let (tickets, report) = normalize_history(history);
        assert_eq!(report.dropped, 0);
        let owners: Vec<_> = tickets.iter().map(|t| t.user_id.as_deref()).collect();
        assert_eq!(owners, vec![Some("42"), Some("42"), None]);
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_timestamp("2026-04-01T08:00:00+02:00").is_some());
        assert_eq!(
            parse_timestamp("2026-04-01 08:00:00"),
            parse_timestamp("2026-04-01T08:00:00Z")
        );
        assert!(parse_timestamp("").is_none());

        assert_eq!(parse_date("2026-04-01"), NaiveDate::from_ymd_opt(2026, 4, 1));
        assert_eq!(parse_date("2026-04-01T22:00:00Z"), NaiveDate::from_ymd_opt(2026, 4, 1));
        assert!(parse_date("01/04/2026").is_none());

        assert_eq!(parse_clock_time("07:30"), NaiveTime::from_hms_opt(7, 30, 0));
        assert_eq!(parse_clock_time("07:30:15"), NaiveTime::from_hms_opt(7, 30, 15));
        assert_eq!(parse_clock_time("7h30"), NaiveTime::from_hms_opt(7, 30, 0));
        assert!(parse_clock_time("soon").is_none());
    }

    #[test]
    fn test_empty_history() {
        let (tickets, report) = normalize_history(TicketHistory {
            upcoming: TicketGroup::default(),
            past: TicketGroup::default(),
        });
        assert!(tickets.is_empty());
        assert_eq!(report, NormalizeReport::default());
    }
}
