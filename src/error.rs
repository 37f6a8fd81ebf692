// Booking errors surfaced to callers of the availability service

use crate::interval::{Interval, InvalidIntervalError};
use crate::reservation::{ApartmentInstanceId, ReservationId, ReservationStatus, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error(transparent)]
    InvalidInterval(#[from] InvalidIntervalError),

    #[error("Apartment instance {instance_id} is not available for {interval}")]
    ReservationConflict {
        instance_id: ApartmentInstanceId,
        interval: Interval,
    },

    #[error("Apartment instance not found: {0}")]
    ApartmentInstanceNotFound(ApartmentInstanceId),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Reservation {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BookingError {
    // Business rule violations, reported to the user rather than treated as faults.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BookingError::Storage(_))
    }
}
