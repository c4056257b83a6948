//! Periodic reconciliation of half-paired sessions.
//!
//! The pairing sequence can leave an `active` session that fewer than two
//! matched requests reference: a crash between session creation and the
//! request updates, or a lost-race rollback that itself failed. Nothing in
//! the polling protocol ever revisits such a session, so this sweep
//! abandons them on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use rvb_db::repositories::LabSessionRepo;
use rvb_db::DbPool;
use rvb_events::{ChangeEvent, EventBus};
use tokio_util::sync::CancellationToken;

/// Run the orphan session sweep loop.
///
/// Finds `active` sessions older than `grace_secs` that fewer than two
/// matched requests reference and marks them abandoned. Timing comes from
/// [`ServerConfig`]. Runs until `cancel` is triggered.
///
/// [`ServerConfig`]: crate::config::ServerConfig
pub async fn run(
    pool: DbPool,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    interval_secs: u64,
    grace_secs: i64,
) {
    tracing::info!(interval_secs, grace_secs, "Orphan session sweep started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Orphan session sweep stopping");
                break;
            }
            _ = interval.tick() => {
                sweep_once(&pool, &event_bus, grace_secs).await;
            }
        }
    }
}

/// One sweep pass: find orphans and abandon each with the usual
/// conditional update. The grace age keeps in-flight pairings out of the
/// candidate set; the update guard skips sessions settled since lookup.
async fn sweep_once(pool: &DbPool, event_bus: &EventBus, grace_secs: i64) {
    let orphans = match LabSessionRepo::find_orphaned(pool, grace_secs).await {
        Ok(orphans) => orphans,
        Err(e) => {
            tracing::error!(error = %e, "Orphan sweep: lookup failed");
            return;
        }
    };

    if orphans.is_empty() {
        tracing::debug!("Orphan sweep: nothing to reconcile");
        return;
    }

    let mut swept = 0usize;
    for session in &orphans {
        match LabSessionRepo::mark_abandoned(pool, session.id).await {
            Ok(true) => {
                swept += 1;
                event_bus.publish(
                    ChangeEvent::new("lab_session.swept")
                        .with_lab(session.lab_id)
                        .with_entity(session.id),
                );
            }
            Ok(false) => {
                // Settled by someone else between lookup and update.
            }
            Err(e) => {
                tracing::error!(session_id = session.id, error = %e, "Orphan sweep: abandon failed");
            }
        }
    }

    tracing::info!(found = orphans.len(), swept, "Orphan sweep: reconciled sessions");
}
