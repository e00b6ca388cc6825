use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{EntityRef, Notification, NotificationKind};
use crate::observability::{STOCK_SHORTFALLS_TOTAL, TRANSITIONS_TOTAL};

use super::conflict::now_ms;
use super::validate::*;
use super::{Engine, EngineError};

/// A rental request as submitted by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRental {
    pub id: Ulid,
    pub item_id: Ulid,
    pub quantity: u32,
    pub rental_date: NaiveDate,
    pub return_date: NaiveDate,
    pub purpose: String,
}

fn transition(name: &'static str) {
    metrics::counter!(TRANSITIONS_TOTAL, "entity" => "rental", "transition" => name).increment(1);
}

fn shortfall(stage: &'static str) {
    metrics::counter!(STOCK_SHORTFALLS_TOTAL, "stage" => stage).increment(1);
}

fn pending_or_processed(r: &RentalRequest) -> Result<(), EngineError> {
    if r.status == RentalStatus::Pending {
        Ok(())
    } else {
        Err(EngineError::AlreadyProcessed {
            id: r.id,
            status: r.status.as_str(),
        })
    }
}

impl Engine {
    /// Create a pending rental request. Nothing is reserved: the stock check
    /// here only turns away requests that could not be met right now.
    pub async fn create_rental(&self, actor: &Actor, req: NewRental) -> Result<RentalRequest, EngineError> {
        require_requester(actor)?;
        check_text(&req.purpose, "purpose too long")?;
        if req.quantity == 0 {
            return Err(EngineError::invalid("quantity must be at least 1"));
        }
        if req.rental_date >= req.return_date {
            return Err(EngineError::invalid(format!(
                "rental date {} must be before return date {}",
                req.rental_date, req.return_date
            )));
        }

        let is = self
            .get_item(&req.item_id)
            .ok_or(EngineError::NotFound(req.item_id))?;
        let mut guard = is.write().await;

        match self.rental_index.entry(req.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(req.id)),
            Entry::Vacant(e) => {
                e.insert(req.item_id);
            }
        }
        let id = req.id;
        let result = self.commit_rental(actor, req, &mut guard).await;
        if result.is_err() {
            self.rental_index.remove(&id);
        }
        result
    }

    async fn commit_rental(
        &self,
        actor: &Actor,
        req: NewRental,
        is: &mut ItemState,
    ) -> Result<RentalRequest, EngineError> {
        if is.requests.len() >= MAX_RENTALS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many rental requests on item"));
        }
        let stock = is.item.stock;
        if !stock.can_cover(req.quantity) {
            shortfall("create");
            return Err(EngineError::InsufficientStock {
                item_id: req.item_id,
                requested: req.quantity,
                available: stock.available(),
            });
        }

        let event = Event::RentalRequested {
            id: req.id,
            item_id: req.item_id,
            requester_id: actor.id.clone(),
            quantity: req.quantity,
            rental_date: req.rental_date,
            return_date: req.return_date,
            purpose: req.purpose,
            at: now_ms(),
        };
        self.persist_item(is, &event).await?;
        transition("create");
        info!(
            "rental {} created by {}: {} x {}",
            req.id, actor.id, req.quantity, req.item_id
        );
        is.requests.get(&req.id).cloned().ok_or(EngineError::NotFound(req.id))
    }

    /// Approve a pending rental, taking its units off the shelf. The stock
    /// check and the decrement happen under one item write lock.
    pub async fn approve_rental(
        &self,
        actor: &Actor,
        id: Ulid,
        admin_notes: Option<String>,
    ) -> Result<RentalRequest, EngineError> {
        require_admin(actor)?;
        check_notes(&admin_notes)?;
        let (item_id, mut guard) = self.resolve_rental_write(&id).await?;

        let r = guard.requests.get(&id).ok_or(EngineError::NotFound(id))?;
        pending_or_processed(r)?;
        let (quantity, requester_id) = (r.quantity, r.requester_id.clone());

        // Dry run on a copy; the real decrement happens when the event applies.
        let mut probe = guard.item.stock;
        if let Err(s) = probe.decrement(quantity) {
            shortfall("approve");
            info!("approval of rental {id} refused: {} of {} available", s.requested, s.available);
            return Err(EngineError::InsufficientStock {
                item_id,
                requested: s.requested,
                available: s.available,
            });
        }

        let at = now_ms();
        let event = Event::RentalApproved {
            id,
            item_id,
            admin_notes,
            at,
        };
        self.persist_item(&mut guard, &event).await?;
        transition("approve");
        info!(
            "rental {id} approved by {}, {} of {} left",
            actor.id,
            guard.item.stock.available(),
            guard.item.stock.total()
        );

        self.publish(Notification {
            kind: NotificationKind::Approved,
            entity: EntityRef::Rental { id, item_id },
            requester_id,
            reason: None,
            at,
        });
        guard.requests.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn reject_rental(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: &str,
        admin_notes: Option<String>,
    ) -> Result<RentalRequest, EngineError> {
        require_admin(actor)?;
        let reason = required_reason(reason)?;
        check_notes(&admin_notes)?;
        let (item_id, mut guard) = self.resolve_rental_write(&id).await?;

        let r = guard.requests.get(&id).ok_or(EngineError::NotFound(id))?;
        pending_or_processed(r)?;
        let requester_id = r.requester_id.clone();

        let at = now_ms();
        let event = Event::RentalRejected {
            id,
            item_id,
            reason: reason.clone(),
            admin_notes,
            at,
        };
        self.persist_item(&mut guard, &event).await?;
        transition("reject");
        info!("rental {id} rejected by {}: {reason}", actor.id);

        self.publish(Notification {
            kind: NotificationKind::Rejected,
            entity: EntityRef::Rental { id, item_id },
            requester_id,
            reason: Some(reason),
            at,
        });
        guard.requests.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Record the return of an approved rental and put its units back.
    pub async fn return_rental(&self, actor: &Actor, id: Ulid) -> Result<RentalRequest, EngineError> {
        require_admin(actor)?;
        let (item_id, mut guard) = self.resolve_rental_write(&id).await?;

        let r = guard.requests.get(&id).ok_or(EngineError::NotFound(id))?;
        if r.status != RentalStatus::Approved {
            return Err(EngineError::InvalidState {
                id,
                status: r.status.as_str(),
            });
        }
        let requester_id = r.requester_id.clone();

        let at = now_ms();
        let event = Event::RentalReturned { id, item_id, at };
        self.persist_item(&mut guard, &event).await?;
        transition("return");
        info!(
            "rental {id} returned, {} of {} available",
            guard.item.stock.available(),
            guard.item.stock.total()
        );

        self.publish(Notification {
            kind: NotificationKind::Returned,
            entity: EntityRef::Rental { id, item_id },
            requester_id,
            reason: None,
            at,
        });
        guard.requests.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Withdraw one's own pending rental request.
    pub async fn delete_rental(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let (item_id, mut guard) = self.resolve_rental_write(&id).await?;

        let r = guard.requests.get(&id).ok_or(EngineError::NotFound(id))?;
        if r.requester_id != actor.id {
            return Err(EngineError::Forbidden("only the requester may delete a rental request"));
        }
        if r.status != RentalStatus::Pending {
            return Err(EngineError::InvalidState {
                id,
                status: r.status.as_str(),
            });
        }

        let event = Event::RentalDeleted { id, item_id };
        self.persist_item(&mut guard, &event).await?;
        transition("delete");
        debug!("rental {id} deleted by {}", actor.id);
        Ok(())
    }
}
