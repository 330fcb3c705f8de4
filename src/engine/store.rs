use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::EngineError;

type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Backing storage for reservations and ratings.
///
/// Implementations only need to be correct per call; admission serializes
/// writers on the same resource above this layer.
#[async_trait]
pub trait IntervalStore: Send + Sync {
    async fn create_resource(&self, id: Ulid) -> Result<(), EngineError>;

    async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError>;

    async fn contains_resource(&self, id: Ulid) -> Result<bool, EngineError>;

    /// All live reservations on a resource, in no particular order.
    async fn list_intervals(&self, resource_id: Ulid) -> Result<Vec<Reservation>, EngineError>;

    async fn find_interval(&self, id: Ulid) -> Result<Reservation, EngineError>;

    async fn insert_interval(&self, reservation: &Reservation) -> Result<(), EngineError>;

    async fn remove_interval(&self, id: Ulid) -> Result<Reservation, EngineError>;

    async fn list_ratings(&self, resource_id: Ulid) -> Result<Vec<Rating>, EngineError>;

    async fn insert_rating(&self, resource_id: Ulid, rating: Rating) -> Result<(), EngineError>;
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

/// Owns the WAL and batches appends: take the first append, drain whatever
/// else is already queued, then one fsync for the lot.
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
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| io::Error::new(e.kind(), e.to_string())),
            );
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride
    // along with the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory resource state made durable by a write-ahead log.
///
/// Every write is appended (and fsynced) before it is applied, so a failed
/// append leaves memory untouched.
pub struct WalStore {
    resources: DashMap<Ulid, SharedResourceState>,
    /// Reverse lookup: reservation id → resource id.
    reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Resource create/delete hold this shared; compaction holds it exclusive
    /// so the set of resources can't change between snapshot and swap.
    catalog: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `path` and start its writer task. Must run inside a
    /// tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            resources: DashMap::new(),
            reservation_to_resource: DashMap::new(),
            catalog: RwLock::new(()),
            wal_tx,
        };
        // Sole owner of every Arc here, so try_write never contends. Never
        // block_on a lock: this can run inside an async context.
        for event in &events {
            store.apply(event);
        }
        tracing::debug!(
            "replayed {} events from {} ({} resources)",
            events.len(),
            path.display(),
            store.resources.len()
        );
        Ok(store)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn get_resource(&self, id: &Ulid) -> Result<SharedResourceState, EngineError> {
        self.resources
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::ResourceNotFound(*id))
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Apply a logged event. Callers must not hold the resource's lock.
    fn apply(&self, event: &Event) {
        match event {
            Event::ResourceCreated { id } => {
                self.resources
                    .insert(*id, Arc::new(RwLock::new(ResourceState::new(*id))));
            }
            Event::ResourceDeleted { id } => {
                if let Some((_, rs)) = self.resources.remove(id)
                    && let Ok(guard) = rs.try_read()
                {
                    for r in &guard.reservations {
                        self.reservation_to_resource.remove(&r.id);
                    }
                }
            }
            Event::ReservationAdmitted {
                id,
                resource_id,
                holder_id,
                span,
            } => {
                if let Some(rs) = self.resources.get(resource_id).map(|e| e.value().clone())
                    && let Ok(mut guard) = rs.try_write()
                {
                    guard.insert_reservation(Reservation {
                        id: *id,
                        resource_id: *resource_id,
                        holder_id: *holder_id,
                        span: *span,
                    });
                    self.reservation_to_resource.insert(*id, *resource_id);
                }
            }
            Event::ReservationCancelled { id, resource_id } => {
                if let Some(rs) = self.resources.get(resource_id).map(|e| e.value().clone())
                    && let Ok(mut guard) = rs.try_write()
                {
                    guard.remove_reservation(*id);
                }
                self.reservation_to_resource.remove(id);
            }
            Event::RatingAdded {
                resource_id,
                reviewer_id,
                stars,
            } => {
                if let Some(rs) = self.resources.get(resource_id).map(|e| e.value().clone())
                    && let Ok(mut guard) = rs.try_write()
                {
                    guard.ratings.push(Rating {
                        reviewer_id: *reviewer_id,
                        stars: *stars,
                    });
                }
            }
        }
    }

    /// Log first, then apply while holding the resource's write lock.
    async fn persist_and_apply(&self, rs: &SharedResourceState, event: &Event) -> Result<(), EngineError> {
        let mut guard = rs.write().await;
        self.wal_append(event).await?;
        match event {
            Event::ReservationAdmitted {
                id,
                resource_id,
                holder_id,
                span,
            } => {
                guard.insert_reservation(Reservation {
                    id: *id,
                    resource_id: *resource_id,
                    holder_id: *holder_id,
                    span: *span,
                });
                self.reservation_to_resource.insert(*id, *resource_id);
            }
            Event::ReservationCancelled { id, .. } => {
                guard.remove_reservation(*id);
                self.reservation_to_resource.remove(id);
            }
            Event::RatingAdded {
                reviewer_id, stars, ..
            } => guard.ratings.push(Rating {
                reviewer_id: *reviewer_id,
                stars: *stars,
            }),
            Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
        }
        Ok(())
    }

    /// Rewrite the log with only the events needed to rebuild current state.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let mut events = Vec::new();
        let snapshot: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        // Read guards stay alive until the rewrite lands so no reservation or
        // rating write can slip in between snapshot and swap. Resource
        // create/delete are held off by the catalog lock.
        let mut guards = Vec::with_capacity(snapshot.len());
        for rs in snapshot {
            let guard = rs.read_owned().await;
            events.push(Event::ResourceCreated { id: guard.id });
            for r in &guard.reservations {
                events.push(Event::ReservationAdmitted {
                    id: r.id,
                    resource_id: guard.id,
                    holder_id: r.holder_id,
                    span: r.span,
                });
            }
            for rating in &guard.ratings {
                events.push(Event::RatingAdded {
                    resource_id: guard.id,
                    reviewer_id: rating.reviewer_id,
                    stars: rating.stars,
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        drop(guards);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
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

#[async_trait]
impl IntervalStore for WalStore {
    async fn create_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.read().await;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::ResourceCreated { id };
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.read().await;
        let rs = self.get_resource(&id)?;
        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        let guard = rs.write().await;
        for r in &guard.reservations {
            self.reservation_to_resource.remove(&r.id);
        }
        drop(guard);
        self.resources.remove(&id);
        Ok(())
    }

    async fn contains_resource(&self, id: Ulid) -> Result<bool, EngineError> {
        Ok(self.resources.contains_key(&id))
    }

    async fn list_intervals(&self, resource_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    async fn find_interval(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self
            .reservation_to_resource
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    async fn insert_interval(&self, reservation: &Reservation) -> Result<(), EngineError> {
        let rs = self.get_resource(&reservation.resource_id)?;
        if rs.read().await.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        if self.reservation_to_resource.contains_key(&reservation.id) {
            return Err(EngineError::AlreadyExists(reservation.id));
        }
        let event = Event::ReservationAdmitted {
            id: reservation.id,
            resource_id: reservation.resource_id,
            holder_id: reservation.holder_id,
            span: reservation.span,
        };
        self.persist_and_apply(&rs, &event).await
    }

    async fn remove_interval(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self.find_interval(id).await?;
        let rs = self.get_resource(&reservation.resource_id)?;
        let event = Event::ReservationCancelled {
            id,
            resource_id: reservation.resource_id,
        };
        self.persist_and_apply(&rs, &event).await?;
        Ok(reservation)
    }

    async fn list_ratings(&self, resource_id: Ulid) -> Result<Vec<Rating>, EngineError> {
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        Ok(guard.ratings.clone())
    }

    async fn insert_rating(&self, resource_id: Ulid, rating: Rating) -> Result<(), EngineError> {
        let rs = self.get_resource(&resource_id)?;
        if rs.read().await.ratings.len() >= MAX_RATINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many ratings on resource"));
        }
        let event = Event::RatingAdded {
            resource_id,
            reviewer_id: rating.reviewer_id,
            stars: rating.stars,
        };
        self.persist_and_apply(&rs, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotbook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn reservation(resource_id: Ulid, start: &str, end: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id,
            holder_id: Ulid::new(),
            span: Span::new(start.parse().unwrap(), end.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn missing_resource_is_not_found() {
        let store = WalStore::open(&test_wal_path("missing.wal")).unwrap();
        let rid = Ulid::new();
        assert!(matches!(
            store.list_intervals(rid).await,
            Err(EngineError::ResourceNotFound(id)) if id == rid
        ));
        assert!(matches!(
            store.insert_interval(&reservation(rid, "2024-01-01", "2024-01-02")).await,
            Err(EngineError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_resource_rejected() {
        let store = WalStore::open(&test_wal_path("dup.wal")).unwrap();
        let rid = Ulid::new();
        store.create_resource(rid).await.unwrap();
        assert!(matches!(
            store.create_resource(rid).await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn insert_find_remove() {
        let store = WalStore::open(&test_wal_path("insert_find_remove.wal")).unwrap();
        let rid = Ulid::new();
        store.create_resource(rid).await.unwrap();
        let r = reservation(rid, "2024-01-10", "2024-01-15");
        store.insert_interval(&r).await.unwrap();

        assert_eq!(store.find_interval(r.id).await.unwrap(), r);
        assert_eq!(store.list_intervals(rid).await.unwrap(), vec![r.clone()]);

        let removed = store.remove_interval(r.id).await.unwrap();
        assert_eq!(removed, r);
        assert!(store.list_intervals(rid).await.unwrap().is_empty());
        assert!(matches!(
            store.find_interval(r.id).await,
            Err(EngineError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let rid = Ulid::new();
        let kept = reservation(rid, "2024-01-10", "2024-01-15");
        let dropped = reservation(rid, "2024-02-10", "2024-02-15");
        let reviewer = Ulid::new();
        {
            let store = WalStore::open(&path).unwrap();
            store.create_resource(rid).await.unwrap();
            store.insert_interval(&kept).await.unwrap();
            store.insert_interval(&dropped).await.unwrap();
            store.remove_interval(dropped.id).await.unwrap();
            store
                .insert_rating(
                    rid,
                    Rating {
                        reviewer_id: reviewer,
                        stars: StarRating::try_from(3).unwrap(),
                    },
                )
                .await
                .unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.list_intervals(rid).await.unwrap(), vec![kept.clone()]);
        assert_eq!(store.find_interval(kept.id).await.unwrap(), kept);
        let ratings = store.list_ratings(rid).await.unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].reviewer_id, reviewer);
        assert_eq!(store.appends_since_compact().await, 5);
    }

    #[tokio::test]
    async fn compact_preserves_state() {
        let path = test_wal_path("compact_state.wal");
        let rid = Ulid::new();
        let kept = reservation(rid, "2024-01-10", "2024-01-15");
        {
            let store = WalStore::open(&path).unwrap();
            store.create_resource(rid).await.unwrap();
            for i in 0..10 {
                let r = reservation(rid, &format!("2024-03-{:02}", i + 1), &format!("2024-03-{:02}", i + 2));
                store.insert_interval(&r).await.unwrap();
                store.remove_interval(r.id).await.unwrap();
            }
            store.insert_interval(&kept).await.unwrap();
            let gone = Ulid::new();
            store.create_resource(gone).await.unwrap();
            store.delete_resource(gone).await.unwrap();

            assert!(store.appends_since_compact().await > 20);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
        }

        let (events, _) = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.resource_count(), 1);
        assert_eq!(store.list_intervals(rid).await.unwrap(), vec![kept]);
    }

    #[tokio::test]
    async fn delete_resource_forgets_reservations() {
        let store = WalStore::open(&test_wal_path("delete.wal")).unwrap();
        let rid = Ulid::new();
        store.create_resource(rid).await.unwrap();
        let r = reservation(rid, "2024-01-10", "2024-01-15");
        store.insert_interval(&r).await.unwrap();

        store.delete_resource(rid).await.unwrap();
        assert!(!store.contains_resource(rid).await.unwrap());
        assert!(matches!(
            store.find_interval(r.id).await,
            Err(EngineError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn appends_after_torn_tail_survive_reopen() {
        use std::io::Write;

        let path = test_wal_path("torn_tail.wal");
        let rid = Ulid::new();
        {
            let store = WalStore::open(&path).unwrap();
            store.create_resource(rid).await.unwrap();
        }
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
        }

        let r = reservation(rid, "2024-01-10", "2024-01-15");
        {
            let store = WalStore::open(&path).unwrap();
            store.insert_interval(&r).await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.list_intervals(rid).await.unwrap(), vec![r]);
    }

    #[tokio::test]
    async fn resource_changes_wait_for_compaction() {
        let path = test_wal_path("compact_catalog.wal");
        let store = Arc::new(WalStore::open(&path).unwrap());
        let held = Ulid::new();
        let doomed = Ulid::new();
        store.create_resource(held).await.unwrap();
        store.create_resource(doomed).await.unwrap();

        // Park compaction on `held` after it has taken the catalog lock.
        let rs = store.get_resource(&held).unwrap();
        let guard = rs.write().await;
        let compaction = tokio::spawn({
            let store = store.clone();
            async move { store.compact().await }
        });
        while store.catalog.try_write().is_ok() {
            tokio::task::yield_now().await;
        }

        let added = Ulid::new();
        let r = reservation(added, "2024-01-10", "2024-01-15");
        let changes = tokio::spawn({
            let store = store.clone();
            let r = r.clone();
            async move {
                store.create_resource(added).await?;
                store.insert_interval(&r).await?;
                store.delete_resource(doomed).await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!changes.is_finished());

        drop(guard);
        compaction.await.unwrap().unwrap();
        changes.await.unwrap().unwrap();
        drop(store);

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.list_intervals(added).await.unwrap(), vec![r]);
        assert!(!store.contains_resource(doomed).await.unwrap());
        assert!(store.contains_resource(held).await.unwrap());
    }
}
