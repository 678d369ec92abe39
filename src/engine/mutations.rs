use ulid::Ulid;

use crate::model::*;
use crate::observability::{RESERVATIONS_TOTAL, UPDATE_RETRIES_TOTAL, outcome_label};

use super::conflict::ensure_range_free;
use super::{ReservationError, ReservationService, ReservationStore, StoreError};

impl<S: ReservationStore> ReservationService<S> {
    /// Book a stay. Fails fast: a concurrent create that claims the same
    /// nights between our check and our commit surfaces as `Saving`.
    pub async fn create(&self, fields: NewReservation) -> Result<Reservation, ReservationError> {
        let result = self.create_once(fields).await;
        metrics::counter!(RESERVATIONS_TOTAL, "op" => "create", "status" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn create_once(&self, fields: NewReservation) -> Result<Reservation, ReservationError> {
        let stay = fields.stay()?;
        let existing = self.store.find_overlapping(stay).await?;
        ensure_range_free(&stay, &existing, None)?;

        match self.store.create(fields).await {
            Ok(reservation) => {
                tracing::debug!("reservation {} created for {stay}", reservation.id);
                Ok(reservation)
            }
            Err(StoreError::Conflict(holder)) => {
                tracing::debug!("create for {stay} lost the race to {holder}");
                Err(ReservationError::Saving(format!(
                    "dates {stay} were reserved concurrently"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the fields of reservation `id`.
    ///
    /// Read, check availability excluding the reservation's own stay, then
    /// compare-and-swap on the version read. A lost race re-runs the whole
    /// cycle; after `max_update_attempts` the update fails with `Saving`.
    pub async fn update(
        &self,
        id: Ulid,
        fields: NewReservation,
    ) -> Result<Reservation, ReservationError> {
        let result = self.update_with_retry(id, fields).await;
        metrics::counter!(RESERVATIONS_TOTAL, "op" => "update", "status" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn update_with_retry(
        &self,
        id: Ulid,
        fields: NewReservation,
    ) -> Result<Reservation, ReservationError> {
        let stay = fields.stay()?;
        let attempts = self.max_update_attempts;

        for attempt in 1..=attempts {
            let current = self.store.get(id).await?;
            let existing = self.store.find_overlapping(stay).await?;
            ensure_range_free(&stay, &existing, Some(id))?;

            match self
                .store
                .update_with_version(id, current.version, fields.clone())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e @ (StoreError::StaleVersion { .. } | StoreError::Conflict(_))) => {
                    tracing::debug!("update of {id} attempt {attempt}/{attempts} lost a race: {e}");
                    if attempt < attempts {
                        metrics::counter!(UPDATE_RETRIES_TOTAL).increment(1);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!("update of {id} gave up after {attempts} attempt(s)");
        Err(ReservationError::Saving(format!(
            "reservation {id} kept changing concurrently"
        )))
    }

    pub async fn delete(&self, id: Ulid) -> Result<(), ReservationError> {
        let result = self.store.delete(id).await.map_err(ReservationError::from);
        metrics::counter!(RESERVATIONS_TOTAL, "op" => "delete", "status" => outcome_label(&result))
            .increment(1);
        if result.is_ok() {
            tracing::debug!("reservation {id} deleted");
        }
        result
    }
}
