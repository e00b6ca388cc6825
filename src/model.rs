use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ledger::Stock;

/// Unix milliseconds. Every timestamp the core records uses this.
pub type Ms = i64;

/// Half-open time-of-day interval `[start, end)` on a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Strict half-open overlap: spans that only share a boundary do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", fmt_slot(self.start), fmt_slot(self.end))
    }
}

/// Parse a time slot label (`HH:MM`, seconds optional).
pub fn parse_slot(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

pub fn fmt_slot(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

/// A resolved, authenticated caller. The core never looks identities up itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn member(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Member }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "approved" => Some(ReservationStatus::Approved),
            "rejected" => Some(ReservationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RentalStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalStatus::Pending => "pending",
            RentalStatus::Approved => "approved",
            RentalStatus::Rejected => "rejected",
            RentalStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RentalStatus::Pending),
            "approved" => Some(RentalStatus::Approved),
            "rejected" => Some(RentalStatus::Rejected),
            "returned" => Some(RentalStatus::Returned),
            _ => None,
        }
    }
}

// ── Facilities & reservations ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub name: String,
    /// Sorted, de-duplicated slot labels. Adjacent labels bound a bookable block.
    pub time_slots: Vec<NaiveTime>,
    pub active: bool,
}

impl Facility {
    pub fn new(id: Ulid, name: String, mut time_slots: Vec<NaiveTime>, active: bool) -> Self {
        time_slots.sort();
        time_slots.dedup();
        Self { id, name, time_slots, active }
    }

    pub fn has_slot(&self, t: NaiveTime) -> bool {
        self.time_slots.binary_search(&t).is_ok()
    }

    /// The bookable blocks `[slot[i], slot[i+1])`.
    pub fn blocks(&self) -> impl Iterator<Item = Span> + '_ {
        self.time_slots.windows(2).map(|w| Span::new(w[0], w[1]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub requester_id: String,
    pub facility_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub purpose: String,
    pub participants: u32,
    pub contact: String,
    pub status: ReservationStatus,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub processed_at: Option<Ms>,
    pub created_at: Ms,
}

/// A reservation's footprint on one day, as seen by the conflict checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub id: Ulid,
    pub span: Span,
}

/// Footprints kept sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct SpanList {
    entries: Vec<Booked>,
}

impl SpanList {
    pub fn insert(&mut self, booked: Booked) {
        let pos = self
            .entries
            .binary_search_by_key(&booked.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, booked);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booked> {
        let pos = self.entries.iter().position(|b| b.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose span overlaps `query`. Binary search skips everything
    /// starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booked> {
        let right_bound = self.entries.partition_point(|b| b.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booked> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DayBook {
    pub approved: SpanList,
    pub pending: SpanList,
}

impl DayBook {
    pub fn is_empty(&self) -> bool {
        self.approved.is_empty() && self.pending.is_empty()
    }
}

/// Everything the core holds for one facility. Guarded by a single lock,
/// so every reservation transition on the facility is serialized.
#[derive(Debug, Clone)]
pub struct FacilityState {
    pub facility: Facility,
    pub reservations: BTreeMap<Ulid, Reservation>,
    pub days: BTreeMap<NaiveDate, DayBook>,
}

impl FacilityState {
    pub fn new(facility: Facility) -> Self {
        Self {
            facility,
            reservations: BTreeMap::new(),
            days: BTreeMap::new(),
        }
    }

    pub fn day(&self, date: &NaiveDate) -> Option<&DayBook> {
        self.days.get(date)
    }

    pub fn insert_reservation(&mut self, r: Reservation) {
        let booked = Booked { id: r.id, span: r.span };
        let day = self.days.entry(r.date).or_default();
        match r.status {
            ReservationStatus::Pending => day.pending.insert(booked),
            ReservationStatus::Approved => day.approved.insert(booked),
            ReservationStatus::Rejected => {}
        }
        self.reservations.insert(r.id, r);
    }

    /// Move a pending footprint into the approved list.
    pub fn promote(&mut self, id: Ulid, date: NaiveDate) {
        if let Some(day) = self.days.get_mut(&date)
            && let Some(booked) = day.pending.remove(id)
        {
            day.approved.insert(booked);
        }
    }

    /// Drop a pending footprint (rejected or deleted).
    pub fn release_pending(&mut self, id: Ulid, date: NaiveDate) {
        if let Some(day) = self.days.get_mut(&date) {
            day.pending.remove(id);
            if day.is_empty() {
                self.days.remove(&date);
            }
        }
    }
}

// ── Rental items & requests ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalItem {
    pub id: Ulid,
    pub name: String,
    pub stock: Stock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalRequest {
    pub id: Ulid,
    pub requester_id: String,
    pub item_id: Ulid,
    pub quantity: u32,
    pub rental_date: NaiveDate,
    pub return_date: NaiveDate,
    pub purpose: String,
    pub status: RentalStatus,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub processed_at: Option<Ms>,
    pub returned_at: Option<Ms>,
    pub created_at: Ms,
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: RentalItem,
    pub requests: BTreeMap<Ulid, RentalRequest>,
}

impl ItemState {
    pub fn new(item: RentalItem) -> Self {
        Self {
            item,
            requests: BTreeMap::new(),
        }
    }

    /// Units currently out on approved loans.
    pub fn outstanding(&self) -> u32 {
        self.requests
            .values()
            .filter(|r| r.status == RentalStatus::Approved)
            .map(|r| r.quantity)
            .sum()
    }
}

// ── Event log ────────────────────────────────────────────────────

/// WAL record format. Flat variants; every state change is exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FacilityUpserted {
        id: Ulid,
        name: String,
        time_slots: Vec<NaiveTime>,
        active: bool,
    },
    ItemUpserted {
        id: Ulid,
        name: String,
        total: u32,
    },
    ReservationCreated {
        id: Ulid,
        facility_id: Ulid,
        requester_id: String,
        date: NaiveDate,
        span: Span,
        purpose: String,
        participants: u32,
        contact: String,
        at: Ms,
    },
    ReservationApproved {
        id: Ulid,
        facility_id: Ulid,
        admin_notes: Option<String>,
        at: Ms,
    },
    ReservationRejected {
        id: Ulid,
        facility_id: Ulid,
        reason: String,
        admin_notes: Option<String>,
        at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
        facility_id: Ulid,
    },
    RentalRequested {
        id: Ulid,
        item_id: Ulid,
        requester_id: String,
        quantity: u32,
        rental_date: NaiveDate,
        return_date: NaiveDate,
        purpose: String,
        at: Ms,
    },
    RentalApproved {
        id: Ulid,
        item_id: Ulid,
        admin_notes: Option<String>,
        at: Ms,
    },
    RentalRejected {
        id: Ulid,
        item_id: Ulid,
        reason: String,
        admin_notes: Option<String>,
        at: Ms,
    },
    RentalReturned {
        id: Ulid,
        item_id: Ulid,
        at: Ms,
    },
    /// Compacted form of an approve + return pair. Restores the row as
    /// returned without touching the ledger.
    RentalSettled {
        id: Ulid,
        item_id: Ulid,
        admin_notes: Option<String>,
        processed_at: Ms,
        returned_at: Ms,
    },
    RentalDeleted {
        id: Ulid,
        item_id: Ulid,
    },
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Pending,
    Approved,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Pending => "pending",
            SlotStatus::Approved => "approved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub span: Span,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockInfo {
    pub item_id: Ulid,
    pub available: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Ulid,
    pub name: String,
    pub available: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub facility_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub status: Option<ReservationStatus>,
    pub requester_id: Option<String>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.facility_id.is_none_or(|f| f == r.facility_id)
            && self.date.is_none_or(|d| d == r.date)
            && self.status.is_none_or(|s| s == r.status)
            && self.requester_id.as_ref().is_none_or(|u| *u == r.requester_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RentalFilter {
    pub item_id: Option<Ulid>,
    pub status: Option<RentalStatus>,
    pub requester_id: Option<String>,
    /// Approved loans whose return date is before this date.
    pub overdue_as_of: Option<NaiveDate>,
}

impl RentalFilter {
    pub fn matches(&self, r: &RentalRequest) -> bool {
        self.item_id.is_none_or(|i| i == r.item_id)
            && self.status.is_none_or(|s| s == r.status)
            && self.requester_id.as_ref().is_none_or(|u| *u == r.requester_id)
            && self.overdue_as_of.is_none_or(|today| {
                r.status == RentalStatus::Approved && r.return_date < today
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_slot(s).unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(t(a), t(b))
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = span("14:00", "15:00");
        let b = span("14:30", "15:30");
        let c = span("15:00", "16:00");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // shared boundary only
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_and_minutes() {
        let outer = span("09:00", "12:00");
        assert!(outer.contains_span(&span("10:00", "11:00")));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&span("11:00", "13:00")));
        assert_eq!(outer.minutes(), 180);
        assert_eq!(outer.to_string(), "[09:00, 12:00)");
    }

    #[test]
    fn slot_parsing() {
        assert_eq!(parse_slot("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_slot(" 14:00:00 "), NaiveTime::from_hms_opt(14, 0, 0));
        assert!(parse_slot("25:00").is_none());
        assert!(parse_slot("noon").is_none());
        assert_eq!(parse_date("2025-03-01"), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert!(parse_date("03/01/2025").is_none());
    }

    #[test]
    fn facility_normalizes_slots() {
        let f = Facility::new(
            Ulid::new(),
            "Gym".into(),
            vec![t("16:00"), t("14:00"), t("15:00"), t("14:00")],
            true,
        );
        assert_eq!(f.time_slots, vec![t("14:00"), t("15:00"), t("16:00")]);
        assert!(f.has_slot(t("15:00")));
        assert!(!f.has_slot(t("15:30")));
        let blocks: Vec<Span> = f.blocks().collect();
        assert_eq!(blocks, vec![span("14:00", "15:00"), span("15:00", "16:00")]);
    }

    #[test]
    fn single_slot_facility_has_no_blocks() {
        let f = Facility::new(Ulid::new(), "Booth".into(), vec![t("09:00")], true);
        assert_eq!(f.blocks().count(), 0);
    }

    #[test]
    fn span_list_keeps_order_and_finds_overlaps() {
        let mut list = SpanList::default();
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        list.insert(Booked { id: ids[0], span: span("15:00", "16:00") });
        list.insert(Booked { id: ids[1], span: span("09:00", "10:00") });
        list.insert(Booked { id: ids[2], span: span("12:00", "13:00") });

        let starts: Vec<NaiveTime> = list.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![t("09:00"), t("12:00"), t("15:00")]);

        let hits: Vec<Ulid> = list.overlapping(&span("12:30", "15:30")).map(|b| b.id).collect();
        assert_eq!(hits, vec![ids[2], ids[0]]);

        // adjacent on both sides
        assert_eq!(list.overlapping(&span("10:00", "12:00")).count(), 0);

        assert!(list.remove(ids[2]).is_some());
        assert!(list.remove(ids[2]).is_none());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn span_list_overlapping_catches_long_span() {
        let mut list = SpanList::default();
        list.insert(Booked { id: Ulid::new(), span: span("08:00", "20:00") });
        assert_eq!(list.overlapping(&span("12:00", "13:00")).count(), 1);
    }

    #[test]
    fn facility_state_moves_footprints() {
        let facility = Facility::new(Ulid::new(), "Hall".into(), vec![t("09:00"), t("10:00")], true);
        let mut fs = FacilityState::new(facility.clone());
        let date = parse_date("2025-05-05").unwrap();
        let id = Ulid::new();
        fs.insert_reservation(Reservation {
            id,
            requester_id: "alice".into(),
            facility_id: facility.id,
            date,
            span: span("09:00", "10:00"),
            purpose: String::new(),
            participants: 1,
            contact: String::new(),
            status: ReservationStatus::Pending,
            admin_notes: None,
            rejection_reason: None,
            processed_at: None,
            created_at: 0,
        });
        assert_eq!(fs.day(&date).unwrap().pending.len(), 1);

        fs.promote(id, date);
        let day = fs.day(&date).unwrap();
        assert_eq!(day.pending.len(), 0);
        assert_eq!(day.approved.len(), 1);

        // releasing an approved footprint is a no-op
        fs.release_pending(id, date);
        assert_eq!(fs.day(&date).unwrap().approved.len(), 1);
    }

    #[test]
    fn status_labels_round_trip() {
        for s in [ReservationStatus::Pending, ReservationStatus::Approved, ReservationStatus::Rejected] {
            assert_eq!(ReservationStatus::parse(s.as_str()), Some(s));
        }
        for s in [RentalStatus::Pending, RentalStatus::Approved, RentalStatus::Rejected, RentalStatus::Returned] {
            assert_eq!(RentalStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RentalStatus::parse("APPROVED"), Some(RentalStatus::Approved));
        assert_eq!(ReservationStatus::parse("returned"), None);
    }

    #[test]
    fn rental_filter_overdue() {
        let today = parse_date("2025-06-10").unwrap();
        let mut r = RentalRequest {
            id: Ulid::new(),
            requester_id: "bob".into(),
            item_id: Ulid::new(),
            quantity: 1,
            rental_date: parse_date("2025-06-01").unwrap(),
            return_date: parse_date("2025-06-05").unwrap(),
            purpose: String::new(),
            status: RentalStatus::Approved,
            admin_notes: None,
            rejection_reason: None,
            processed_at: None,
            returned_at: None,
            created_at: 0,
        };
        let filter = RentalFilter { overdue_as_of: Some(today), ..Default::default() };
        assert!(filter.matches(&r));
        r.status = RentalStatus::Returned;
        assert!(!filter.matches(&r));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            id: Ulid::new(),
            facility_id: Ulid::new(),
            requester_id: "alice".into(),
            date: parse_date("2025-01-31").unwrap(),
            span: span("14:00", "15:00"),
            purpose: "club meeting".into(),
            participants: 12,
            contact: "010-0000".into(),
            at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
