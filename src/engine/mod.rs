mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{free_dates, occupied_dates};
pub use conflict::is_range_free;
pub use error::{ReservationError, StoreError};
pub use queries::today;
pub use store::{ReservationStore, SharedReservation, WalStore};

use std::sync::Arc;

use crate::config::BookingPolicy;
use crate::limits::MAX_UPDATE_ATTEMPTS;

/// Default number of optimistic update attempts before giving up.
pub const DEFAULT_UPDATE_ATTEMPTS: u32 = 3;

/// Reservation use cases over an injected store.
///
/// Holds no locks of its own. Concurrent updates coordinate only through the
/// store's version compare-and-swap, retried a bounded number of times.
pub struct ReservationService<S: ReservationStore> {
    store: Arc<S>,
    policy: BookingPolicy,
    max_update_attempts: u32,
}

impl<S: ReservationStore> ReservationService<S> {
    pub fn new(store: Arc<S>, policy: BookingPolicy) -> Self {
        Self {
            store,
            policy,
            max_update_attempts: DEFAULT_UPDATE_ATTEMPTS,
        }
    }

    /// Override the update retry bound. Clamped to `1..=MAX_UPDATE_ATTEMPTS`.
    pub fn with_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts.clamp(1, MAX_UPDATE_ATTEMPTS);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn max_update_attempts(&self) -> u32 {
        self.max_update_attempts
    }
}
