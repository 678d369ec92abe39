use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::calendar::DateRange;
use crate::model::*;
use crate::wal::Wal;

use super::StoreError;

/// Authoritative storage of reservations with optimistic concurrency.
///
/// `update_with_version` is the compare-and-swap primitive the service's retry
/// loop is built on: it must apply atomically or not at all.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Every committed reservation, ordered by arrival date.
    async fn list_all(&self) -> Result<Vec<Reservation>, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Reservation, StoreError>;

    /// Reservations whose stay intersects `window`.
    async fn find_overlapping(&self, window: DateRange) -> Result<Vec<Reservation>, StoreError>;

    /// Insert under a fresh id at version 0. Re-checks occupancy in the same
    /// atomic unit as the insert and fails with `Conflict` on overlap.
    async fn create(&self, fields: NewReservation) -> Result<Reservation, StoreError>;

    /// Replace the fields of `id` iff its stored version is still
    /// `expected_version`; `StaleVersion` otherwise, with nothing applied.
    async fn update_with_version(
        &self,
        id: Ulid,
        expected_version: Version,
        fields: NewReservation,
    ) -> Result<Reservation, StoreError>;

    async fn delete(&self, id: Ulid) -> Result<(), StoreError>;
}

/// A record slot. `None` once the reservation is deleted, so writers that
/// looked the slot up before the delete observe `NotFound`.
pub type SharedReservation = Arc<RwLock<Option<Reservation>>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, fsync once,
/// answer every sender with the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let reply = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(reply);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Append and fsync a batch. A batch that fails part way is cut back off the
/// log, since every write in it is reported failed and must not replay.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mark = wal.durable_len()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.truncate(mark)
    {
        tracing::error!("failed to roll back WAL batch: {e}");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Nights claimed by one write. Released on drop unless committed, so a
/// failed or cancelled write never leaves dates blocked.
struct NightClaim<'a> {
    nights: &'a DashMap<NaiveDate, Ulid>,
    owner: Ulid,
    dates: Vec<NaiveDate>,
    committed: bool,
}

impl NightClaim<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for NightClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            release_nights(self.nights, self.owner, self.dates.drain(..));
        }
    }
}

fn release_nights(
    nights: &DashMap<NaiveDate, Ulid>,
    owner: Ulid,
    dates: impl IntoIterator<Item = NaiveDate>,
) {
    for date in dates {
        nights.remove_if(&date, |_, holder| *holder == owner);
    }
}

/// In-memory reservation table made durable by a group-commit WAL.
///
/// Each record sits behind its own lock, which makes the version
/// compare-and-swap atomic per id without serializing unrelated ids. The
/// `nights` index maps every occupied date to its holder and doubles as a
/// uniqueness constraint: a write must claim each night of its stay before it
/// may commit.
///
/// Mutations run on their own task. A caller that stops waiting abandons only
/// the answer; the WAL append and the in-memory apply still land together.
pub struct WalStore {
    state: Arc<StoreState>,
}

struct StoreState {
    records: DashMap<Ulid, SharedReservation>,
    nights: DashMap<NaiveDate, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared across WAL append + apply; compaction takes
    /// it exclusively so its snapshot never misses an in-flight write.
    compaction_gate: RwLock<()>,
}

/// Drive a mutation to completion on a task the caller cannot cancel.
async fn run_detached<T, F>(mutation: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|e| StoreError::WalError(format!("store task failed: {e}")))?
}

impl WalStore {
    /// Replay the WAL at `wal_path` and spawn its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut live: HashMap<Ulid, Reservation> = HashMap::new();
        for event in events {
            match event {
                Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                    live.insert(reservation.id, reservation);
                }
                Event::ReservationDeleted { id } => {
                    live.remove(&id);
                }
            }
        }

        let state = StoreState {
            records: DashMap::new(),
            nights: DashMap::new(),
            wal_tx,
            compaction_gate: RwLock::new(()),
        };
        for (id, reservation) in live {
            for date in reservation.stay().dates() {
                state.nights.insert(date, id);
            }
            state.records.insert(id, Arc::new(RwLock::new(Some(reservation))));
        }
        tracing::info!(
            "opened reservation store at {} with {} reservation(s)",
            wal_path.display(),
            state.records.len()
        );
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    /// Rewrite the WAL as one `ReservationCreated` per live reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let state = self.state.clone();
        run_detached(async move { state.compact().await }).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .state
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl StoreState {
    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    fn slot(&self, id: &Ulid) -> Result<SharedReservation, StoreError> {
        self.records
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    /// Claim every night of `stay` for `owner`. Nights `owner` already holds
    /// are kept as they are. On collision, everything this call claimed is
    /// released and the holder is reported.
    fn claim_nights(&self, owner: Ulid, stay: &DateRange) -> Result<NightClaim<'_>, StoreError> {
        let mut claim = NightClaim {
            nights: &self.nights,
            owner,
            dates: Vec::with_capacity(stay.nights() as usize),
            committed: false,
        };
        for date in stay.dates() {
            match self.nights.entry(date) {
                Entry::Occupied(entry) => {
                    let holder = *entry.get();
                    drop(entry);
                    if holder != owner {
                        return Err(StoreError::Conflict(holder));
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(owner);
                    claim.dates.push(date);
                }
            }
        }
        Ok(claim)
    }

    async fn list_all(&self) -> Vec<Reservation> {
        let slots: Vec<SharedReservation> = self.records.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(r) = slot.read().await.as_ref() {
                all.push(r.clone());
            }
        }
        all.sort_by_key(|r| (r.arrival_date, r.id));
        all
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction_gate.write().await;
        let mut snapshot = self.list_all().await;
        snapshot.sort_by_key(|r| r.id);
        let events: Vec<Event> = snapshot
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    async fn create(&self, fields: NewReservation) -> Result<Reservation, StoreError> {
        let _shared = self.compaction_gate.read().await;
        let id = Ulid::new();
        let stay = DateRange::new(fields.arrival_date, fields.departure_date);
        let claim = self.claim_nights(id, &stay)?;

        let reservation = fields.into_reservation(id);
        self.wal_append(&Event::ReservationCreated {
            reservation: reservation.clone(),
        })
        .await?;
        claim.commit();
        self.records
            .insert(id, Arc::new(RwLock::new(Some(reservation.clone()))));
        Ok(reservation)
    }

    async fn update_with_version(
        &self,
        id: Ulid,
        expected_version: Version,
        fields: NewReservation,
    ) -> Result<Reservation, StoreError> {
        let _shared = self.compaction_gate.read().await;
        let slot = self.slot(&id)?;
        let mut guard = slot.write().await;
        let current = guard.as_ref().ok_or(StoreError::NotFound(id))?;
        if current.version != expected_version {
            return Err(StoreError::StaleVersion {
                id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let old_stay = current.stay();
        let next = current.revised(&fields);
        let new_stay = next.stay();
        let claim = self.claim_nights(id, &new_stay)?;

        self.wal_append(&Event::ReservationUpdated {
            reservation: next.clone(),
        })
        .await?;
        claim.commit();
        release_nights(
            &self.nights,
            id,
            old_stay.dates().filter(|date| !new_stay.contains(*date)),
        );
        *guard = Some(next.clone());
        Ok(next)
    }

    async fn delete(&self, id: Ulid) -> Result<(), StoreError> {
        let _shared = self.compaction_gate.read().await;
        let slot = self.slot(&id)?;
        let mut guard = slot.write().await;
        let stay = guard.as_ref().ok_or(StoreError::NotFound(id))?.stay();

        self.wal_append(&Event::ReservationDeleted { id }).await?;
        *guard = None;
        self.records.remove(&id);
        release_nights(&self.nights, id, stay.dates());
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn list_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.list_all().await)
    }

    async fn get(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let slot = self.state.slot(&id)?;
        let guard = slot.read().await;
        guard.clone().ok_or(StoreError::NotFound(id))
    }

    async fn find_overlapping(&self, window: DateRange) -> Result<Vec<Reservation>, StoreError> {
        let mut seen = HashSet::new();
        let holders: Vec<Ulid> = window
            .dates()
            .filter_map(|date| self.state.nights.get(&date).map(|e| *e.value()))
            .filter(|id| seen.insert(*id))
            .collect();

        let mut found = Vec::with_capacity(holders.len());
        for id in holders {
            // Claims of writes still in flight have no committed record yet.
            let Ok(slot) = self.state.slot(&id) else { continue };
            if let Some(r) = slot.read().await.as_ref()
                && r.stay().overlaps(&window)
            {
                found.push(r.clone());
            }
        }
        found.sort_by_key(|r| r.arrival_date);
        Ok(found)
    }

    async fn create(&self, fields: NewReservation) -> Result<Reservation, StoreError> {
        let state = self.state.clone();
        run_detached(async move { state.create(fields).await }).await
    }

    async fn update_with_version(
        &self,
        id: Ulid,
        expected_version: Version,
        fields: NewReservation,
    ) -> Result<Reservation, StoreError> {
        let state = self.state.clone();
        run_detached(async move { state.update_with_version(id, expected_version, fields).await }).await
    }

    async fn delete(&self, id: Ulid) -> Result<(), StoreError> {
        let state = self.state.clone();
        run_detached(async move { state.delete(id).await }).await
    }
}
