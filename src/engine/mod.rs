mod availability;
mod catalog;
mod conflict;
mod error;
mod queries;
mod rentals;
mod reservations;
mod validate;

pub use availability::slot_availability;
pub use conflict::find_conflict;
pub use error::EngineError;
pub use rentals::NewRental;
pub use reservations::NewReservation;
pub(crate) use validate::require_admin;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::ledger::Stock;
use crate::model::*;
use crate::notify::{Notification, NotificationSink};
use crate::wal::Wal;

pub type SharedFacility = Arc<RwLock<FacilityState>>;
pub type SharedItem = Arc<RwLock<ItemState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, and makes the whole batch durable with one fsync.
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
        commit_batch(&mut wal, batch);
        // Compaction must observe every append queued before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray buffered bytes are not
    // attributed to the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Event application ────────────────────────────────────

/// Which row group an event belongs to.
enum Owner {
    Facility(Ulid),
    Item(Ulid),
}

fn event_owner(event: &Event) -> Owner {
    match event {
        Event::FacilityUpserted { id, .. } => Owner::Facility(*id),
        Event::ReservationCreated { facility_id, .. }
        | Event::ReservationApproved { facility_id, .. }
        | Event::ReservationRejected { facility_id, .. }
        | Event::ReservationDeleted { facility_id, .. } => Owner::Facility(*facility_id),
        Event::ItemUpserted { id, .. } => Owner::Item(*id),
        Event::RentalRequested { item_id, .. }
        | Event::RentalApproved { item_id, .. }
        | Event::RentalRejected { item_id, .. }
        | Event::RentalReturned { item_id, .. }
        | Event::RentalSettled { item_id, .. }
        | Event::RentalDeleted { item_id, .. } => Owner::Item(*item_id),
    }
}

/// Apply a facility-side event. Caller holds the facility's write lock.
fn apply_to_facility(fs: &mut FacilityState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::FacilityUpserted {
            id,
            name,
            time_slots,
            active,
        } => {
            fs.facility = Facility::new(*id, name.clone(), time_slots.clone(), *active);
        }
        Event::ReservationCreated {
            id,
            facility_id,
            requester_id,
            date,
            span,
            purpose,
            participants,
            contact,
            at,
        } => {
            fs.insert_reservation(Reservation {
                id: *id,
                requester_id: requester_id.clone(),
                facility_id: *facility_id,
                date: *date,
                span: *span,
                purpose: purpose.clone(),
                participants: *participants,
                contact: contact.clone(),
                status: ReservationStatus::Pending,
                admin_notes: None,
                rejection_reason: None,
                processed_at: None,
                created_at: *at,
            });
            index.insert(*id, *facility_id);
        }
        Event::ReservationApproved {
            id,
            admin_notes,
            at,
            ..
        } => {
            let Some(r) = fs.reservations.get_mut(id) else {
                return;
            };
            r.status = ReservationStatus::Approved;
            r.admin_notes = admin_notes.clone();
            r.processed_at = Some(*at);
            let date = r.date;
            fs.promote(*id, date);
        }
        Event::ReservationRejected {
            id,
            reason,
            admin_notes,
            at,
            ..
        } => {
            let Some(r) = fs.reservations.get_mut(id) else {
                return;
            };
            r.status = ReservationStatus::Rejected;
            r.rejection_reason = Some(reason.clone());
            r.admin_notes = admin_notes.clone();
            r.processed_at = Some(*at);
            let date = r.date;
            fs.release_pending(*id, date);
        }
        Event::ReservationDeleted { id, .. } => {
            if let Some(r) = fs.reservations.remove(id) {
                fs.release_pending(*id, r.date);
            }
            index.remove(id);
        }
        _ => {}
    }
}

/// Apply an item-side event. Caller holds the item's write lock.
/// Ledger preconditions were checked before the event was committed.
fn apply_to_item(is: &mut ItemState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ItemUpserted { id, name, total } => {
            is.item.name = name.clone();
            if let Err(s) = is.item.stock.resize(*total) {
                tracing::warn!(
                    "item {id}: total {total} below {} units on loan, keeping {}",
                    s.requested,
                    is.item.stock.total()
                );
            }
        }
        Event::RentalRequested {
            id,
            item_id,
            requester_id,
            quantity,
            rental_date,
            return_date,
            purpose,
            at,
        } => {
            is.requests.insert(
                *id,
                RentalRequest {
                    id: *id,
                    requester_id: requester_id.clone(),
                    item_id: *item_id,
                    quantity: *quantity,
                    rental_date: *rental_date,
                    return_date: *return_date,
                    purpose: purpose.clone(),
                    status: RentalStatus::Pending,
                    admin_notes: None,
                    rejection_reason: None,
                    processed_at: None,
                    returned_at: None,
                    created_at: *at,
                },
            );
            index.insert(*id, *item_id);
        }
        Event::RentalApproved {
            id,
            admin_notes,
            at,
            ..
        } => {
            let Some(r) = is.requests.get_mut(id) else {
                return;
            };
            if let Err(s) = is.item.stock.decrement(r.quantity) {
                tracing::warn!(
                    "rental {id}: ledger short applying approval (requested {}, available {})",
                    s.requested,
                    s.available
                );
            }
            r.status = RentalStatus::Approved;
            r.admin_notes = admin_notes.clone();
            r.processed_at = Some(*at);
        }
        Event::RentalRejected {
            id,
            reason,
            admin_notes,
            at,
            ..
        } => {
            let Some(r) = is.requests.get_mut(id) else {
                return;
            };
            r.status = RentalStatus::Rejected;
            r.rejection_reason = Some(reason.clone());
            r.admin_notes = admin_notes.clone();
            r.processed_at = Some(*at);
        }
        Event::RentalReturned { id, at, .. } => {
            let Some(r) = is.requests.get_mut(id) else {
                return;
            };
            let overflow = is.item.stock.increment(r.quantity);
            if overflow > 0 {
                tracing::warn!("rental {id}: return clamped, {overflow} units over total");
            }
            r.status = RentalStatus::Returned;
            r.returned_at = Some(*at);
        }
        Event::RentalSettled {
            id,
            admin_notes,
            processed_at,
            returned_at,
            ..
        } => {
            let Some(r) = is.requests.get_mut(id) else {
                return;
            };
            r.status = RentalStatus::Returned;
            r.admin_notes = admin_notes.clone();
            r.processed_at = Some(*processed_at);
            r.returned_at = Some(*returned_at);
        }
        Event::RentalDeleted { id, .. } => {
            is.requests.remove(id);
            index.remove(id);
        }
        _ => {}
    }
}

// ── Engine ───────────────────────────────────────────────

/// The allocation store. Each facility and each rental item is a row group
/// behind its own lock; a transition checks, logs and applies under one
/// write-lock acquisition.
pub struct Engine {
    pub(super) facilities: DashMap<Ulid, SharedFacility>,
    pub(super) items: DashMap<Ulid, SharedItem>,
    /// reservation id → facility id
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// rental id → item id
    pub(super) rental_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held while a new row group is logged and published, and for the
    /// whole of a compaction.
    pub(super) group_creation: Mutex<()>,
    sink: Arc<dyn NotificationSink>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf, sink: Arc<dyn NotificationSink>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_index = DashMap::new();
        let rental_index = DashMap::new();
        let mut facilities: HashMap<Ulid, FacilityState> = HashMap::new();
        let mut items: HashMap<Ulid, ItemState> = HashMap::new();

        // Replay owns plain maps; locks are added once state is complete.
        for event in &events {
            match (event_owner(event), event) {
                (Owner::Facility(id), Event::FacilityUpserted { name, time_slots, active, .. }) => {
                    let fs = facilities.entry(id).or_insert_with(|| {
                        FacilityState::new(Facility::new(id, name.clone(), time_slots.clone(), *active))
                    });
                    apply_to_facility(fs, event, &reservation_index);
                }
                (Owner::Item(id), Event::ItemUpserted { name, total, .. }) => {
                    let is = items.entry(id).or_insert_with(|| {
                        ItemState::new(RentalItem {
                            id,
                            name: name.clone(),
                            stock: Stock::new(*total),
                        })
                    });
                    apply_to_item(is, event, &rental_index);
                }
                (Owner::Facility(id), _) => match facilities.get_mut(&id) {
                    Some(fs) => apply_to_facility(fs, event, &reservation_index),
                    None => tracing::warn!("replay: event for unknown facility {id}"),
                },
                (Owner::Item(id), _) => match items.get_mut(&id) {
                    Some(is) => apply_to_item(is, event, &rental_index),
                    None => tracing::warn!("replay: event for unknown item {id}"),
                },
            }
        }

        tracing::debug!(
            "replayed {} events: {} facilities, {} items",
            events.len(),
            facilities.len(),
            items.len()
        );

        Ok(Self {
            facilities: facilities
                .into_iter()
                .map(|(id, fs)| (id, Arc::new(RwLock::new(fs))))
                .collect(),
            items: items
                .into_iter()
                .map(|(id, is)| (id, Arc::new(RwLock::new(is))))
                .collect(),
            reservation_index,
            rental_index,
            wal_tx,
            group_creation: Mutex::new(()),
            sink,
        })
    }

    /// Durably append one event via the group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_facility(&self, id: &Ulid) -> Option<SharedFacility> {
        self.facilities.get(id).map(|e| e.value().clone())
    }

    pub fn get_item(&self, id: &Ulid) -> Option<SharedItem> {
        self.items.get(id).map(|e| e.value().clone())
    }

    pub fn facility_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    pub fn item_for_rental(&self, id: &Ulid) -> Option<Ulid> {
        self.rental_index.get(id).map(|e| *e.value())
    }

    /// Log then apply. Memory is only touched once the event is durable.
    pub(super) async fn persist_facility(
        &self,
        fs: &mut FacilityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_facility(fs, event, &self.reservation_index);
        Ok(())
    }

    pub(super) async fn persist_item(&self, is: &mut ItemState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_item(is, event, &self.rental_index);
        Ok(())
    }

    /// Lookup reservation → facility and take the facility's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<FacilityState>), EngineError> {
        let facility_id = self
            .facility_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        Ok((facility_id, fs.write_owned().await))
    }

    pub(super) async fn resolve_rental_write(
        &self,
        id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ItemState>), EngineError> {
        let item_id = self.item_for_rental(id).ok_or(EngineError::NotFound(*id))?;
        let is = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        Ok((item_id, is.write_owned().await))
    }

    /// Hand a committed outcome to the sink. Never fails the caller.
    pub(super) fn publish(&self, notification: Notification) {
        self.sink.publish(notification);
    }

    /// Rewrite the WAL as the minimal event set reproducing current state.
    ///
    /// No group can be created while this runs, and read locks on every
    /// existing group are held until the compacted file is in place, so
    /// nothing commits to the old file after the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _creating = self.group_creation.lock().await;
        let mut facilities: Vec<(Ulid, SharedFacility)> = self
            .facilities
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        facilities.sort_by_key(|(id, _)| *id);
        let mut items: Vec<(Ulid, SharedItem)> = self
            .items
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        items.sort_by_key(|(id, _)| *id);

        let mut facility_guards = Vec::with_capacity(facilities.len());
        for (_, fs) in facilities {
            facility_guards.push(fs.read_owned().await);
        }
        let mut item_guards = Vec::with_capacity(items.len());
        for (_, is) in items {
            item_guards.push(is.read_owned().await);
        }

        let mut events = Vec::new();
        for fs in &facility_guards {
            snapshot_facility(fs, &mut events);
        }
        for is in &item_guards {
            snapshot_item(is, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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

fn snapshot_facility(fs: &FacilityState, events: &mut Vec<Event>) {
    let f = &fs.facility;
    events.push(Event::FacilityUpserted {
        id: f.id,
        name: f.name.clone(),
        time_slots: f.time_slots.clone(),
        active: f.active,
    });
    for r in fs.reservations.values() {
        events.push(Event::ReservationCreated {
            id: r.id,
            facility_id: r.facility_id,
            requester_id: r.requester_id.clone(),
            date: r.date,
            span: r.span,
            purpose: r.purpose.clone(),
            participants: r.participants,
            contact: r.contact.clone(),
            at: r.created_at,
        });
        let at = r.processed_at.unwrap_or(r.created_at);
        match r.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Approved => events.push(Event::ReservationApproved {
                id: r.id,
                facility_id: r.facility_id,
                admin_notes: r.admin_notes.clone(),
                at,
            }),
            ReservationStatus::Rejected => events.push(Event::ReservationRejected {
                id: r.id,
                facility_id: r.facility_id,
                reason: r.rejection_reason.clone().unwrap_or_default(),
                admin_notes: r.admin_notes.clone(),
                at,
            }),
        }
    }
}

fn snapshot_item(is: &ItemState, events: &mut Vec<Event>) {
    let item = &is.item;
    events.push(Event::ItemUpserted {
        id: item.id,
        name: item.name.clone(),
        total: item.stock.total(),
    });
    for r in is.requests.values() {
        events.push(Event::RentalRequested {
            id: r.id,
            item_id: r.item_id,
            requester_id: r.requester_id.clone(),
            quantity: r.quantity,
            rental_date: r.rental_date,
            return_date: r.return_date,
            purpose: r.purpose.clone(),
            at: r.created_at,
        });
        let at = r.processed_at.unwrap_or(r.created_at);
        match r.status {
            RentalStatus::Pending => {}
            // Outstanding loans never exceed total, so these replay cleanly.
            RentalStatus::Approved => events.push(Event::RentalApproved {
                id: r.id,
                item_id: r.item_id,
                admin_notes: r.admin_notes.clone(),
                at,
            }),
            RentalStatus::Rejected => events.push(Event::RentalRejected {
                id: r.id,
                item_id: r.item_id,
                reason: r.rejection_reason.clone().unwrap_or_default(),
                admin_notes: r.admin_notes.clone(),
                at,
            }),
            RentalStatus::Returned => events.push(Event::RentalSettled {
                id: r.id,
                item_id: r.item_id,
                admin_notes: r.admin_notes.clone(),
                processed_at: at,
                returned_at: r.returned_at.unwrap_or(at),
            }),
        }
    }
}
