use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::availability::{free_windows, slot_availability};
use super::conflict::find_conflict;
use super::{Engine, EngineError, SharedFacility, SharedItem};

impl Engine {
    fn facility_groups(&self, only: Option<Ulid>) -> Vec<SharedFacility> {
        match only {
            Some(id) => self.get_facility(&id).into_iter().collect(),
            None => self.facilities.iter().map(|e| e.value().clone()).collect(),
        }
    }

    fn item_groups(&self, only: Option<Ulid>) -> Vec<SharedItem> {
        match only {
            Some(id) => self.get_item(&id).into_iter().collect(),
            None => self.items.iter().map(|e| e.value().clone()).collect(),
        }
    }

    /// Reservations matching `filter`, ordered by id (creation order).
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut out = Vec::new();
        for fs in self.facility_groups(filter.facility_id) {
            let guard = fs.read().await;
            out.extend(guard.reservations.values().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Rental requests matching `filter`, ordered by id (creation order).
    pub async fn list_rentals(&self, filter: &RentalFilter) -> Vec<RentalRequest> {
        let mut out = Vec::new();
        for is in self.item_groups(filter.item_id) {
            let guard = is.read().await;
            out.extend(guard.requests.values().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let facility_id = self.facility_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        guard.reservations.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn get_rental(&self, id: Ulid) -> Result<RentalRequest, EngineError> {
        let item_id = self.item_for_rental(&id).ok_or(EngineError::NotFound(id))?;
        let is = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = is.read().await;
        guard.requests.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Per-block status of a facility on one date.
    pub async fn availability(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        Ok(slot_availability(&guard, &date))
    }

    /// Maximal runs of blocks not taken by an approved reservation.
    pub async fn free_windows(&self, facility_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let slots = self.availability(facility_id, date).await?;
        Ok(free_windows(&slots))
    }

    /// Would `[start, end)` on `date` overlap an approved reservation other
    /// than `exclude`? Read-only; approval repeats the check under the lock.
    pub async fn has_conflict(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        if start >= end {
            return Err(EngineError::invalid("start must be before end"));
        }
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        Ok(find_conflict(&guard, &date, &Span::new(start, end), exclude).is_some())
    }

    pub async fn stock(&self, item_id: Ulid) -> Result<StockInfo, EngineError> {
        let is = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = is.read().await;
        Ok(StockInfo {
            item_id,
            available: guard.item.stock.available(),
            total: guard.item.stock.total(),
        })
    }

    pub async fn list_facilities(&self) -> Vec<Facility> {
        let mut out = Vec::new();
        for fs in self.facility_groups(None) {
            out.push(fs.read().await.facility.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn list_items(&self) -> Vec<ItemInfo> {
        let mut out = Vec::new();
        for is in self.item_groups(None) {
            let guard = is.read().await;
            out.push(ItemInfo {
                id: guard.item.id,
                name: guard.item.name.clone(),
                available: guard.item.stock.available(),
                total: guard.item.stock.total(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}
