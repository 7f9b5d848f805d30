// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline-first ticket cache walkthrough.
//!
//! Demonstrates:
//! 1. Starting a session and syncing from a (canned) ticket history
//! 2. Read-time status derivation
//! 3. A change-feed burst collapsing into one refresh
//! 4. Losing connectivity and serving the persisted snapshot
//! 5. Switching users and logging out
//! 6. Displaying recorded metrics
//!
//! Everything runs in-process: the remote source is a canned history and
//! the snapshot lives in a temporary SQLite file.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=ticket_sync=debug cargo run --example offline_sync
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tokio::sync::watch;

use ticket_sync::{
    ChangeOp, LocalChangeFeed, RemoteTicketSource, SqliteKvStore, StaticSession, SyncConfig,
    SyncError, TicketHistory, TicketsCache,
};

/// Serves the same history for every user, stamped with that user's id.
struct CannedHistory {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteTicketSource for CannedHistory {
    async fn fetch_history(&self, user_id: &str, _auth_token: &str) -> Result<TicketHistory, SyncError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let history = json!({
            "upcoming": {
                "urban": [{
                    "id": format!("{user_id}-bus"),
                    "user_id": user_id,
                    "status": "Valid",
                    "operator": "Dem Dikk",
                    "origin_zone": "Zone 1",
                    "destination_zone": "Zone 3",
                    "validated_at": (now - chrono::Duration::minutes(20)).to_rfc3339(),
                }],
                "interurban": [{
                    "id": format!("{user_id}-coach"),
                    "user_id": user_id,
                    "status": "confirmed",
                    "origin": "Dakar",
                    "destination": "Saint-Louis",
                    "travel_date": (now + chrono::Duration::days(2)).format("%Y-%m-%d").to_string(),
                    "departure_time": "07:30",
                    "seat": "14B",
                    "payment": { "amount": 7500, "currency": "XOF", "method": "wave" },
                }],
            },
            "past": {
                "urban": [{
                    "id": format!("{user_id}-old"),
                    "user_id": user_id,
                    "status": "Valid",
                    "operator": "BRT",
                    "departure_at": (now - chrono::Duration::days(3)).to_rfc3339(),
                }],
            },
        });
        serde_json::from_value(history).map_err(|e| SyncError::Network(e.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_sync=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           ticket-sync: Offline-First Walkthrough              ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire up the cache
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("tickets.db");
    let kv = Arc::new(SqliteKvStore::open(db_path.to_str().unwrap_or("tickets.db")).await?);

    let source = Arc::new(CannedHistory { calls: AtomicUsize::new(0) });
    let feed = Arc::new(LocalChangeFeed::new());
    let (online_tx, online_rx) = watch::channel(true);

    let cache = TicketsCache::with_change_feed(
        SyncConfig::default(),
        source.clone(),
        Arc::new(StaticSession::new("demo-token")),
        kv,
        online_rx,
        feed.clone(),
    )?;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Start a session
    // ─────────────────────────────────────────────────────────────────────────
    println!("🚌 Starting session for u1...");
    if let Some(outcome) = cache.start("u1").await {
        println!("   Outcome: {:?}", outcome);
    }
    print_tickets(&cache);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Change-feed burst
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📡 Publishing a burst of 5 ticket changes...");
    let before = source.calls.load(Ordering::Relaxed);
    for i in 0..5 {
        feed.publish("tickets", None, ChangeOp::Update, Some(&format!("row-{i}")));
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!(
        "   Remote fetches caused by the burst: {}",
        source.calls.load(Ordering::Relaxed) - before
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Go offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Connectivity lost, pulling to refresh...");
    online_tx.send(false)?;
    println!("   Outcome: {:?}", cache.refresh().await);
    print_tickets(&cache);

    println!("\n📶 Connectivity restored...");
    online_tx.send(true)?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("   Last updated: {:?}", cache.last_updated());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Switch user, then log out
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n👤 Switching to u2...");
    cache.switch_user("u2").await;
    print_tickets(&cache);

    println!("\n🚪 Logging out...");
    cache.logout().await;
    println!("   Metadata: {:?}", cache.metadata());

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics");
    dump_metrics(&snapshotter);

    Ok(())
}

fn print_tickets(cache: &TicketsCache) {
    let view = cache.view();
    println!(
        "   user={:?} loading={} has_loaded={} error={:?}",
        view.user_id, view.loading, view.has_loaded, view.error
    );
    for ticket in &view.tickets {
        println!(
            "   • {:<10} {:<32} {:<8} clickable={}",
            ticket.kind_label(),
            ticket.route_label(),
            cache.status_of(ticket).to_string(),
            cache.is_clickable(ticket),
        );
    }
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
