/// Max length of a facility or item name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of free text (purpose, contact, notes, rejection reasons).
pub const MAX_TEXT_LEN: usize = 2048;

/// Max length of a requester id handed over by the identity provider.
pub const MAX_REQUESTER_ID_LEN: usize = 256;

pub const MAX_SLOTS_PER_FACILITY: usize = 288; // every 5 minutes

pub const MAX_FACILITIES: usize = 10_000;
pub const MAX_ITEMS: usize = 10_000;

/// Max reservation rows kept per facility (any status).
pub const MAX_RESERVATIONS_PER_FACILITY: usize = 100_000;

/// Max rental rows kept per item (any status).
pub const MAX_RENTALS_PER_ITEM: usize = 100_000;

pub const MAX_ITEM_TOTAL: u32 = 1_000_000;
pub const MAX_PARTICIPANTS: u32 = 100_000;
