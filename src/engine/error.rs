use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input, rejected before the store is touched.
    Validation(String),
    /// Overlaps the approved reservation with this id.
    Conflict(Ulid),
    InsufficientStock {
        item_id: Ulid,
        requested: u32,
        available: u32,
    },
    /// A decision was attempted on a row that is no longer pending.
    AlreadyProcessed {
        id: Ulid,
        status: &'static str,
    },
    /// The row exists but its status does not allow this operation.
    InvalidState {
        id: Ulid,
        status: &'static str,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::InsufficientStock { .. } => "insufficient_stock",
            EngineError::AlreadyProcessed { .. } => "already_processed",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(id) => write!(f, "conflicts with approved reservation: {id}"),
            EngineError::InsufficientStock {
                item_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient stock for item {item_id}: requested {requested}, available {available}"
            ),
            EngineError::AlreadyProcessed { id, status } => {
                write!(f, "already processed: {id} is {status}")
            }
            EngineError::InvalidState { id, status } => {
                write!(f, "operation not allowed: {id} is {status}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
