//! Startup catalog: facilities with their time slots and rental items with
//! their totals, read from a JSON file and upserted into the engine.
//!
//! ```json
//! {
//!   "facilities": [{ "id": "01J…", "name": "Gym", "time_slots": ["09:00", "10:00"], "active": true }],
//!   "items": [{ "id": "01J…", "name": "Tent", "total": 5 }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{parse_slot, Facility};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FacilityEntry {
    pub id: Ulid,
    pub name: String,
    pub time_slots: Vec<String>,
    #[serde(default = "active_default")]
    pub active: bool,
}

fn active_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemEntry {
    pub id: Ulid,
    pub name: String,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub facilities: Vec<FacilityEntry>,
    #[serde(default)]
    pub items: Vec<ItemEntry>,
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Json(serde_json::Error),
    BadSlot { facility: Ulid, slot: String },
    Engine(EngineError),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "catalog unreadable: {e}"),
            CatalogError::Json(e) => write!(f, "catalog malformed: {e}"),
            CatalogError::BadSlot { facility, slot } => {
                write!(f, "facility {facility}: bad time slot {slot:?}")
            }
            CatalogError::Engine(e) => write!(f, "catalog rejected: {e}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<EngineError> for CatalogError {
    fn from(e: EngineError) -> Self {
        CatalogError::Engine(e)
    }
}

/// How many entries `apply` wrote; unchanged entries are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub facilities: usize,
    pub items: usize,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(CatalogError::Json)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(CatalogError::Io)?;
        Self::from_json(&json)
    }

    /// Upsert every entry that differs from what the engine already holds,
    /// so restarting with the same file adds nothing to the WAL.
    pub async fn apply(&self, engine: &Engine) -> Result<Applied, CatalogError> {
        let mut applied = Applied::default();

        for entry in &self.facilities {
            let slots = entry
                .time_slots
                .iter()
                .map(|s| {
                    parse_slot(s).ok_or_else(|| CatalogError::BadSlot {
                        facility: entry.id,
                        slot: s.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let wanted = Facility::new(entry.id, entry.name.clone(), slots.clone(), entry.active);
            if let Some(existing) = engine.get_facility(&entry.id) {
                if existing.read().await.facility == wanted {
                    continue;
                }
            }
            engine
                .upsert_facility(entry.id, entry.name.clone(), slots, entry.active)
                .await?;
            applied.facilities += 1;
        }

        for entry in &self.items {
            if let Some(existing) = engine.get_item(&entry.id) {
                let guard = existing.read().await;
                if guard.item.name == entry.name && guard.item.stock.total() == entry.total {
                    continue;
                }
            }
            engine.upsert_item(entry.id, entry.name.clone(), entry.total).await?;
            applied.items += 1;
        }

        tracing::info!(
            "catalog applied: {} facilities, {} items changed",
            applied.facilities,
            applied.items
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::notify::NotifyHub;

    const GYM: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const TENT: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn sample() -> String {
        format!(
            r#"{{
                "facilities": [{{ "id": "{GYM}", "name": "Gym", "time_slots": ["09:00", "09:30", "10:00"] }}],
                "items": [{{ "id": "{TENT}", "name": "Tent", "total": 5 }}]
            }}"#
        )
    }

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("allocd_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn parses_with_defaults() {
        let catalog = Catalog::from_json(&sample()).unwrap();
        assert_eq!(catalog.facilities.len(), 1);
        assert!(catalog.facilities[0].active);
        assert_eq!(catalog.items[0].total, 5);
        assert_eq!(Catalog::from_json("{}").unwrap(), Catalog::default());
        assert!(matches!(Catalog::from_json("[]"), Err(CatalogError::Json(_))));
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let engine = Engine::new(test_wal_path("idempotent.wal"), Arc::new(NotifyHub::new())).unwrap();
        let catalog = Catalog::from_json(&sample()).unwrap();

        let first = catalog.apply(&engine).await.unwrap();
        assert_eq!(first, Applied { facilities: 1, items: 1 });
        let second = catalog.apply(&engine).await.unwrap();
        assert_eq!(second, Applied::default());
        assert_eq!(engine.wal_appends_since_compact().await, 2);

        let stock = engine.stock(Ulid::from_string(TENT).unwrap()).await.unwrap();
        assert_eq!((stock.available, stock.total), (5, 5));
        let facilities = engine.list_facilities().await;
        assert_eq!(facilities[0].time_slots.len(), 3);
    }

    #[tokio::test]
    async fn bad_slot_is_reported() {
        let engine = Engine::new(test_wal_path("bad_slot.wal"), Arc::new(NotifyHub::new())).unwrap();
        let json = format!(r#"{{ "facilities": [{{ "id": "{GYM}", "name": "Gym", "time_slots": ["9am", "10am"] }}] }}"#);
        let catalog = Catalog::from_json(&json).unwrap();
        assert!(matches!(
            catalog.apply(&engine).await,
            Err(CatalogError::BadSlot { .. })
        ));
    }
}
