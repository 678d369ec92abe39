/// Widest availability window a single query may ask for.
pub const MAX_QUERY_WINDOW_DAYS: u64 = 366;

/// Longest first or last name accepted.
pub const MAX_NAME_LEN: usize = 256;

/// Longest email address accepted (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 320;

/// Upper bound on optimistic update attempts, whatever the configuration says.
pub const MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Largest encoded WAL entry written or replayed.
pub const MAX_WAL_ENTRY: usize = 1 << 20;
