use chrono::{NaiveDate, NaiveTime};
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{EntityRef, Notification, NotificationKind};
use crate::observability::{CONFLICTS_TOTAL, TRANSITIONS_TOTAL};

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::validate::*;
use super::{Engine, EngineError};

/// A reservation request as submitted by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub purpose: String,
    pub participants: u32,
    pub contact: String,
}

fn transition(name: &'static str) {
    metrics::counter!(TRANSITIONS_TOTAL, "entity" => "reservation", "transition" => name)
        .increment(1);
}

fn pending_or_processed(r: &Reservation) -> Result<(), EngineError> {
    if r.status == ReservationStatus::Pending {
        Ok(())
    } else {
        Err(EngineError::AlreadyProcessed {
            id: r.id,
            status: r.status.as_str(),
        })
    }
}

impl Engine {
    /// Create a pending reservation.
    ///
    /// The conflict check here is advisory: it turns away requests that
    /// already clash with an approved booking, but only approval decides.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        req: NewReservation,
    ) -> Result<Reservation, EngineError> {
        require_requester(actor)?;
        check_text(&req.purpose, "purpose too long")?;
        check_text(&req.contact, "contact too long")?;
        if req.participants == 0 {
            return Err(EngineError::invalid("participants must be at least 1"));
        }
        if req.participants > MAX_PARTICIPANTS {
            return Err(EngineError::LimitExceeded("too many participants"));
        }

        let fs = self
            .get_facility(&req.facility_id)
            .ok_or(EngineError::NotFound(req.facility_id))?;
        let mut guard = fs.write().await;

        // Claim the id across all facilities before anything is logged.
        match self.reservation_index.entry(req.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(req.id)),
            Entry::Vacant(e) => {
                e.insert(req.facility_id);
            }
        }
        let id = req.id;
        let result = self.commit_reservation(actor, req, &mut guard).await;
        if result.is_err() {
            self.reservation_index.remove(&id);
        }
        result
    }

    async fn commit_reservation(
        &self,
        actor: &Actor,
        req: NewReservation,
        fs: &mut FacilityState,
    ) -> Result<Reservation, EngineError> {
        if !fs.facility.active {
            return Err(EngineError::invalid(format!(
                "facility {} is not accepting reservations",
                req.facility_id
            )));
        }
        let span = validate_span(&fs.facility, req.start, req.end)?;
        if fs.reservations.len() >= MAX_RESERVATIONS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many reservations on facility"));
        }
        if let Err(e) = check_no_conflict(fs, &req.date, &span, None) {
            metrics::counter!(CONFLICTS_TOTAL, "stage" => "create").increment(1);
            debug!("reservation {} refused at create: {e}", req.id);
            return Err(e);
        }

        let event = Event::ReservationCreated {
            id: req.id,
            facility_id: req.facility_id,
            requester_id: actor.id.clone(),
            date: req.date,
            span,
            purpose: req.purpose,
            participants: req.participants,
            contact: req.contact,
            at: now_ms(),
        };
        self.persist_facility(fs, &event).await?;
        transition("create");
        info!(
            "reservation {} created by {} on {} {span}",
            req.id, actor.id, req.date
        );
        fs.reservations
            .get(&req.id)
            .cloned()
            .ok_or(EngineError::NotFound(req.id))
    }

    /// Approve a pending reservation. The overlap re-check and the status
    /// write happen under one facility write lock, so two overlapping
    /// approvals can never both succeed.
    pub async fn approve_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        admin_notes: Option<String>,
    ) -> Result<Reservation, EngineError> {
        require_admin(actor)?;
        check_notes(&admin_notes)?;
        let (facility_id, mut guard) = self.resolve_reservation_write(&id).await?;

        let r = guard.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
        pending_or_processed(r)?;
        let (date, span, requester_id) = (r.date, r.span, r.requester_id.clone());

        if let Err(e) = check_no_conflict(&guard, &date, &span, Some(id)) {
            metrics::counter!(CONFLICTS_TOTAL, "stage" => "approve").increment(1);
            info!("approval of {id} refused: {e}");
            return Err(e);
        }

        let at = now_ms();
        let event = Event::ReservationApproved {
            id,
            facility_id,
            admin_notes,
            at,
        };
        self.persist_facility(&mut guard, &event).await?;
        transition("approve");
        info!("reservation {id} approved by {}", actor.id);

        self.publish(Notification {
            kind: NotificationKind::Approved,
            entity: EntityRef::Reservation { id, facility_id },
            requester_id,
            reason: None,
            at,
        });
        guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn reject_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: &str,
        admin_notes: Option<String>,
    ) -> Result<Reservation, EngineError> {
        require_admin(actor)?;
        let reason = required_reason(reason)?;
        check_notes(&admin_notes)?;
        let (facility_id, mut guard) = self.resolve_reservation_write(&id).await?;

        let r = guard.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
        pending_or_processed(r)?;
        let requester_id = r.requester_id.clone();

        let at = now_ms();
        let event = Event::ReservationRejected {
            id,
            facility_id,
            reason: reason.clone(),
            admin_notes,
            at,
        };
        self.persist_facility(&mut guard, &event).await?;
        transition("reject");
        info!("reservation {id} rejected by {}: {reason}", actor.id);

        self.publish(Notification {
            kind: NotificationKind::Rejected,
            entity: EntityRef::Reservation { id, facility_id },
            requester_id,
            reason: Some(reason),
            at,
        });
        guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Withdraw one's own pending reservation.
    pub async fn delete_reservation(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let (facility_id, mut guard) = self.resolve_reservation_write(&id).await?;

        let r = guard.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
        if r.requester_id != actor.id {
            return Err(EngineError::Forbidden("only the requester may delete a reservation"));
        }
        if r.status != ReservationStatus::Pending {
            return Err(EngineError::InvalidState {
                id,
                status: r.status.as_str(),
            });
        }

        let event = Event::ReservationDeleted { id, facility_id };
        self.persist_facility(&mut guard, &event).await?;
        transition("delete");
        debug!("reservation {id} deleted by {}", actor.id);
        Ok(())
    }
}
