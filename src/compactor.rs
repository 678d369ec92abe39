use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{StoreError, WalStore};
use crate::observability::COMPACTIONS_TOTAL;

/// How often the compactor checks the WAL.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have accumulated since the last compaction.
/// Returns whether a compaction ran.
pub async fn maybe_compact(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    let result = store.compact().await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(COMPACTIONS_TOTAL, "status" => status).increment(1);
    result?;
    info!("compacted WAL after {appends} appends, {} live reservation(s)", store.len());
    Ok(true)
}

/// Background task that rewrites the WAL as a snapshot of live reservations
/// whenever it has grown by `threshold` appends.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&store, threshold).await {
            tracing::warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReservationStore;
    use crate::model::NewReservation;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("campsite_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn fields(arrival: &str, departure: &str) -> NewReservation {
        NewReservation {
            guest_email: "test@email.com".into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            arrival_date: arrival.parse().unwrap(),
            departure_date: departure.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = WalStore::open(&path).unwrap();

        let r = store.create(fields("2024-05-10", "2024-05-12")).await.unwrap();
        assert!(!maybe_compact(&store, 3).await.unwrap());

        store
            .update_with_version(r.id, 0, fields("2024-05-10", "2024-05-13"))
            .await
            .unwrap();
        let gone = store.create(fields("2024-06-01", "2024-06-02")).await.unwrap();
        store.delete(gone.id).await.unwrap();
        assert!(maybe_compact(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(!maybe_compact(&store, 3).await.unwrap());
    }
}
