use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::ledger::Stock;
use crate::limits::*;
use crate::model::*;

use super::validate::check_name;
use super::{Engine, EngineError, SharedFacility, SharedItem};

impl Engine {
    /// Create a facility or replace its name, slots and active flag.
    /// Existing reservations are kept as they are.
    pub async fn upsert_facility(
        &self,
        id: Ulid,
        name: String,
        time_slots: Vec<NaiveTime>,
        active: bool,
    ) -> Result<Facility, EngineError> {
        check_name(&name)?;
        if time_slots.len() > MAX_SLOTS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many time slots"));
        }
        let facility = Facility::new(id, name, time_slots, active);
        if facility.time_slots.len() < 2 {
            return Err(EngineError::invalid("a facility needs at least two time slots"));
        }

        let event = Event::FacilityUpserted {
            id,
            name: facility.name.clone(),
            time_slots: facility.time_slots.clone(),
            active: facility.active,
        };

        if let Some(shared) = self.get_facility(&id) {
            return self.update_facility(&shared, &event).await;
        }
        let creating = self.group_creation.lock().await;
        if let Some(shared) = self.get_facility(&id) {
            drop(creating);
            return self.update_facility(&shared, &event).await;
        }
        if self.facilities.len() >= MAX_FACILITIES {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }

        // Published only once durable.
        let mut fs = FacilityState::new(facility.clone());
        self.persist_facility(&mut fs, &event).await?;
        self.facilities.insert(id, Arc::new(RwLock::new(fs)));
        info!(
            "facility {id} created ({} slots, active={})",
            facility.time_slots.len(),
            facility.active
        );
        Ok(facility)
    }

    async fn update_facility(&self, shared: &SharedFacility, event: &Event) -> Result<Facility, EngineError> {
        let mut guard = shared.write().await;
        self.persist_facility(&mut guard, event).await?;
        info!(
            "facility {} updated ({} slots, active={})",
            guard.facility.id,
            guard.facility.time_slots.len(),
            guard.facility.active
        );
        Ok(guard.facility.clone())
    }

    /// Create an item or change its name and total. A new total must still
    /// cover the units currently on loan.
    pub async fn upsert_item(&self, id: Ulid, name: String, total: u32) -> Result<ItemInfo, EngineError> {
        check_name(&name)?;
        if total > MAX_ITEM_TOTAL {
            return Err(EngineError::LimitExceeded("item total too large"));
        }

        let event = Event::ItemUpserted {
            id,
            name: name.clone(),
            total,
        };

        if let Some(shared) = self.get_item(&id) {
            return self.update_item(&shared, &event, total).await;
        }
        let creating = self.group_creation.lock().await;
        if let Some(shared) = self.get_item(&id) {
            drop(creating);
            return self.update_item(&shared, &event, total).await;
        }
        if self.items.len() >= MAX_ITEMS {
            return Err(EngineError::LimitExceeded("too many items"));
        }

        let mut is = ItemState::new(RentalItem {
            id,
            name,
            stock: Stock::new(total),
        });
        self.persist_item(&mut is, &event).await?;
        let info = item_info(&is);
        self.items.insert(id, Arc::new(RwLock::new(is)));
        info!("item {id} created (total {total})");
        Ok(info)
    }

    async fn update_item(&self, shared: &SharedItem, event: &Event, total: u32) -> Result<ItemInfo, EngineError> {
        let mut guard = shared.write().await;
        let mut probe = guard.item.stock;
        if let Err(s) = probe.resize(total) {
            return Err(EngineError::invalid(format!(
                "total {total} is below the {} units on loan",
                s.requested
            )));
        }
        self.persist_item(&mut guard, event).await?;
        info!("item {} updated (total {total})", guard.item.id);
        Ok(item_info(&guard))
    }
}

fn item_info(is: &ItemState) -> ItemInfo {
    ItemInfo {
        id: is.item.id,
        name: is.item.name.clone(),
        available: is.item.stock.available(),
        total: is.item.stock.total(),
    }
}
