use chrono::NaiveDate;

use crate::model::*;

// ── Slot availability ────────────────────────────────────────────

/// Status of every bookable block of a facility on `date`.
///
/// A block is `approved` if any approved reservation overlaps it, otherwise
/// `pending` if any pending reservation does, otherwise `available`.
/// Rejected reservations have no footprint and are never consulted.
pub fn slot_availability(fs: &FacilityState, date: &NaiveDate) -> Vec<SlotAvailability> {
    let day = fs.day(date);
    fs.facility
        .blocks()
        .map(|span| {
            let status = match day {
                Some(day) if day.approved.overlapping(&span).next().is_some() => SlotStatus::Approved,
                Some(day) if day.pending.overlapping(&span).next().is_some() => SlotStatus::Pending,
                _ => SlotStatus::Available,
            };
            SlotAvailability { span, status }
        })
        .collect()
}

/// Merge runs of adjacent bookable blocks into maximal windows. Pending
/// blocks count as bookable: only approval takes a block away.
pub fn free_windows(slots: &[SlotAvailability]) -> Vec<Span> {
    let mut windows: Vec<Span> = Vec::new();
    for slot in slots.iter().filter(|s| s.status != SlotStatus::Approved) {
        match windows.last_mut() {
            Some(last) if last.end == slot.span.start => last.end = slot.span.end,
            _ => windows.push(slot.span),
        }
    }
    windows
}
