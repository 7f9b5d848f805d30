// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ticket status derivation.
//!
//! Pure functions: a ticket plus the current time yields its effective
//! lifecycle state. Status is always derived at read time and never stored,
//! so a cached ticket expires on screen without a sync.
//!
//! # Priority
//!
//! ```text
//! validity window ended ──► Expired   (overrides any server status)
//! pending_update marker ──► Updating
//! server status string  ──► Active | Pending | Expired | Used | Updating
//! otherwise             ──► Active
//! ```
//!
//! All calendar arithmetic is in UTC (the served operators run on UTC+0).

use chrono::{DateTime, Duration, Utc};

use super::{Ticket, Trip};

/// Effective ticket state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketStatus {
    Active,
    Expired,
    Pending,
    Used,
    Updating,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Expired => write!(f, "Expired"),
            Self::Pending => write!(f, "Pending"),
            Self::Used => write!(f, "Used"),
            Self::Updating => write!(f, "Updating"),
        }
    }
}

/// Validity for unrecognized operators and for the booking-time fallback.
const DEFAULT_VALIDITY_HOURS: i64 = 2;

/// End of the ticket's validity window.
///
/// Returns `None` for tickets that cannot expire from local data alone
/// (interurban tickets with no date or departure, urban tickets with no
/// reference time at all).
///
/// Urban tickets measure from their departure reference: the validation
/// time if validated, else the earlier of the scheduled boarding time and
/// the booking time. Without a boarding time, the booking time plus two
/// hours applies.
#[must_use]
pub fn validity_window_end(ticket: &Ticket) -> Option<DateTime<Utc>> {
    match &ticket.trip {
        Trip::Urban(urban) => {
            let validity = ticket
                .operator()
                .map_or(Duration::hours(DEFAULT_VALIDITY_HOURS), |op| op.urban_validity());
            let boarding = match (urban.departure_at, ticket.booked_at) {
                (Some(departure), Some(booked)) => Some(departure.min(booked)),
                (departure, _) => departure,
            };
            match ticket.core.validated_at.or(boarding) {
                Some(reference) => Some(reference + validity),
                None => ticket
                    .booked_at
                    .map(|booked| booked + Duration::hours(DEFAULT_VALIDITY_HOURS)),
            }
        }
        Trip::Interurban(trip) => match (trip.travel_date, trip.departure_time) {
            (Some(date), Some(time)) => Some(date.and_time(time).and_utc()),
            (Some(date), None) => date
                .and_hms_milli_opt(23, 59, 59, 999)
                .map(|end_of_day| end_of_day.and_utc()),
            (None, _) => trip.departure_at,
        },
    }
}

/// Whether `now` is past the validity window. Non-expirable tickets never are.
#[must_use]
pub fn is_window_elapsed(ticket: &Ticket, now: DateTime<Utc>) -> bool {
    validity_window_end(ticket).is_some_and(|end| now > end)
}

/// Map a server status string, case-insensitively.
///
/// ```
/// use ticket_sync::ticket::status::{map_server_status, TicketStatus};
///
/// assert_eq!(map_server_status("VALID"), Some(TicketStatus::Active));
/// assert_eq!(map_server_status("is_updated"), Some(TicketStatus::Updating));
/// assert_eq!(map_server_status("refunded"), None);
/// ```
#[must_use]
pub fn map_server_status(raw: &str) -> Option<TicketStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "valid" | "active" | "confirmed" => Some(TicketStatus::Active),
        "pending" => Some(TicketStatus::Pending),
        "expired" => Some(TicketStatus::Expired),
        "used" => Some(TicketStatus::Used),
        "isupdated" | "is_updated" => Some(TicketStatus::Updating),
        _ => None,
    }
}

/// Derive a ticket's effective status at `now`.
#[must_use]
pub fn derive_status(ticket: &Ticket, now: DateTime<Utc>) -> TicketStatus {
    if is_window_elapsed(ticket, now) {
        return TicketStatus::Expired;
    }
    if ticket.sync.pending_update {
        return TicketStatus::Updating;
    }
    ticket
        .core
        .server_status
        .as_deref()
        .and_then(map_server_status)
        .unwrap_or(TicketStatus::Active)
}

/// Last moment a pending on-board ticket can still be activated: booking
/// (else scheduled boarding) plus the default two-hour validity.
fn activation_deadline(ticket: &Ticket) -> Option<DateTime<Utc>> {
    let Trip::Urban(urban) = &ticket.trip else {
        return None;
    };
    ticket
        .booked_at
        .or(urban.departure_at)
        .map(|reference| reference + Duration::hours(DEFAULT_VALIDITY_HOURS))
}

/// Pending urban tickets of on-board-activation operators stay actionable
/// past their validity window, until the activation deadline, so the rider
/// can finish activation on the vehicle.
#[must_use]
pub fn is_special_pending_activation(ticket: &Ticket, now: DateTime<Utc>) -> bool {
    if !activation_deadline(ticket).is_some_and(|deadline| now <= deadline) {
        return false;
    }
    let pending = ticket
        .core
        .server_status
        .as_deref()
        .and_then(map_server_status)
        == Some(TicketStatus::Pending);
    pending && ticket.operator().is_some_and(|op| op.activates_on_board())
}

/// Whether the ticket detail screen may be opened.
#[must_use]
pub fn is_clickable(ticket: &Ticket, now: DateTime<Utc>) -> bool {
    derive_status(ticket, now) != TicketStatus::Expired || is_special_pending_activation(ticket, now)
}
