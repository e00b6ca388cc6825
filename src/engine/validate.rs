use crate::limits::*;
use crate::model::Actor;

use super::EngineError;

pub(crate) fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("administrator role required"))
    }
}

pub(crate) fn require_requester(actor: &Actor) -> Result<(), EngineError> {
    if actor.id.trim().is_empty() {
        return Err(EngineError::invalid("requester id must not be empty"));
    }
    if actor.id.len() > MAX_REQUESTER_ID_LEN {
        return Err(EngineError::LimitExceeded("requester id too long"));
    }
    Ok(())
}

pub(crate) fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn check_text(value: &str, too_long: &'static str) -> Result<(), EngineError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(())
}

pub(crate) fn check_notes(notes: &Option<String>) -> Result<(), EngineError> {
    match notes {
        Some(n) => check_text(n, "admin notes too long"),
        None => Ok(()),
    }
}

/// A rejection must say why. Returns the trimmed reason.
pub(crate) fn required_reason(reason: &str) -> Result<String, EngineError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(EngineError::invalid("a rejection reason is required"));
    }
    check_text(reason, "rejection reason too long")?;
    Ok(reason.to_string())
}
