use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `start < end`, and both are slot labels of the facility.
pub(crate) fn validate_span(
    facility: &Facility,
    start: NaiveTime,
    end: NaiveTime,
) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::invalid(format!(
            "start {} must be before end {}",
            fmt_slot(start),
            fmt_slot(end)
        )));
    }
    for t in [start, end] {
        if !facility.has_slot(t) {
            return Err(EngineError::invalid(format!(
                "{} is not a time slot of facility {}",
                fmt_slot(t),
                facility.id
            )));
        }
    }
    Ok(Span::new(start, end))
}

/// First approved reservation on `date` whose span overlaps `span`,
/// ignoring `exclude`. Pending reservations never conflict.
pub fn find_conflict(
    fs: &FacilityState,
    date: &NaiveDate,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    let day = fs.day(date)?;
    day.approved
        .overlapping(span)
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    fs: &FacilityState,
    date: &NaiveDate,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(fs, date, span, exclude) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}
