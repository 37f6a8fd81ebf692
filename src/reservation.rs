// Reservations, apartment instances and the persistence collaborator

use crate::interval::{Interval, InvalidIntervalError};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type ApartmentInstanceId = u64;
pub type ReservationId = u64;
pub type UserId = u64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Other storage error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl ReservationStatus {
    // REJECTED is terminal
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Rejected) | (Confirmed, Rejected)
        )
    }

    pub fn occupies_calendar(self) -> bool {
        self == ReservationStatus::Confirmed
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

// One bookable unit (a concrete room) of an apartment listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApartmentInstance {
    pub id: ApartmentInstanceId,
    pub name: String,
    // One iCal URL per external booking channel
    pub calendar_urls: Vec<String>,
}

impl ApartmentInstance {
    pub fn new(id: ApartmentInstanceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            calendar_urls: Vec::new(),
        }
    }

    pub fn with_calendar(mut self, url: impl Into<String>) -> Self {
        self.calendar_urls.push(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub apartment_instance_id: ApartmentInstanceId,
    pub user_id: UserId,
    pub interval: Interval,
}

impl ReservationRequest {
    pub fn new(
        apartment_instance_id: ApartmentInstanceId,
        user_id: UserId,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Self, InvalidIntervalError> {
        Ok(Self {
            apartment_instance_id,
            user_id,
            interval: Interval::new(from, to)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub apartment_instance_id: ApartmentInstanceId,
    pub user_id: UserId,
    pub interval: Interval,
    pub status: ReservationStatus,
    pub created_at: NaiveDateTime,
}

// Reservation data before the store assigns an id
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub request: ReservationRequest,
    pub status: ReservationStatus,
}

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    async fn find_instance(
        &self,
        id: ApartmentInstanceId,
    ) -> Result<Option<ApartmentInstance>, StoreError>;

    async fn confirmed_intervals_for(
        &self,
        id: ApartmentInstanceId,
    ) -> Result<Vec<Interval>, StoreError>;

    async fn persist(&self, reservation: NewReservation) -> Result<Reservation, StoreError>;

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    async fn update_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError>;
}

#[derive(Default)]
pub struct InMemoryReservationStore {
    instances: RwLock<HashMap<ApartmentInstanceId, ApartmentInstance>>,
    reservations: RwLock<HashMap<ReservationId, Reservation>>,
    next_id: AtomicU64,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, instance: ApartmentInstance) {
        self.instances.write().insert(instance.id, instance);
    }

    pub fn reservations_for(&self, id: ApartmentInstanceId) -> Vec<Reservation> {
        let mut reservations: Vec<Reservation> = self
            .reservations
            .read()
            .values()
            .filter(|r| r.apartment_instance_id == id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.id);
        reservations
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn find_instance(
        &self,
        id: ApartmentInstanceId,
    ) -> Result<Option<ApartmentInstance>, StoreError> {
        Ok(self.instances.read().get(&id).cloned())
    }

    async fn confirmed_intervals_for(
        &self,
        id: ApartmentInstanceId,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self
            .reservations
            .read()
            .values()
            .filter(|r| r.apartment_instance_id == id && r.status.occupies_calendar())
            .map(|r| r.interval)
            .collect())
    }

    async fn persist(&self, reservation: NewReservation) -> Result<Reservation, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let NewReservation { request, status } = reservation;
        let saved = Reservation {
            id,
            apartment_instance_id: request.apartment_instance_id,
            user_id: request.user_id,
            interval: request.interval,
            status,
            created_at: Utc::now().naive_utc(),
        };
        self.reservations.write().insert(id, saved.clone());
        Ok(saved)
    }

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.read().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let mut reservations = self.reservations.write();
        let reservation = reservations
            .get_mut(&id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        reservation.status = status;
        Ok(reservation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{at, interval};
    use super::ReservationStatus::*;
    use test_case::test_case;

    #[test_case(Pending, Confirmed, true; "#1 pending to confirmed")]
    #[test_case(Pending, Rejected, true; "#2 pending to rejected")]
    #[test_case(Confirmed, Rejected, true; "#3 cancellation")]
    #[test_case(Confirmed, Pending, false; "#4 no way back to pending")]
    #[test_case(Rejected, Confirmed, false; "#5 rejected is terminal")]
    #[test_case(Rejected, Pending, false; "#6 rejected is terminal for pending")]
    #[test_case(Confirmed, Confirmed, false; "#7 no self transition")]
    fn test_status_transitions(from: ReservationStatus, to: ReservationStatus, expected: bool) {
        assert_eq!(from.can_transition_to(to), expected);
    }

    #[test]
    fn test_request_rejects_invalid_interval() {
        let result = ReservationRequest::new(
            1,
            7,
            at("2024-01-15T11:00"),
            at("2024-01-12T11:00"),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_only_confirmed_reservations_occupy_the_calendar() {
        let store = InMemoryReservationStore::new();
        store.add_instance(ApartmentInstance::new(1, "Room 101"));

        let stays = [
            (interval("2024-01-01T14:00", "2024-01-03T11:00"), Confirmed),
            (interval("2024-01-05T14:00", "2024-01-07T11:00"), Pending),
            (interval("2024-01-09T14:00", "2024-01-10T11:00"), Rejected),
        ];
        for (stay, status) in stays {
            store
                .persist(NewReservation {
                    request: ReservationRequest {
                        apartment_instance_id: 1,
                        user_id: 7,
                        interval: stay,
                    },
                    status,
                })
                .await
                .unwrap();
        }

        let busy = store.confirmed_intervals_for(1).await.unwrap();
        assert_eq!(busy, vec![interval("2024-01-01T14:00", "2024-01-03T11:00")]);
        assert!(store.confirmed_intervals_for(2).await.unwrap().is_empty());
        assert_eq!(store.reservations_for(1).len(), 3);
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = InMemoryReservationStore::new();
        let saved = store
            .persist(NewReservation {
                request: ReservationRequest {
                    apartment_instance_id: 1,
                    user_id: 7,
                    interval: interval("2024-01-01T14:00", "2024-01-03T11:00"),
                },
                status: Confirmed,
            })
            .await
            .unwrap();
        assert_eq!(saved.id, 1);

        let updated = store.update_status(saved.id, Rejected).await.unwrap();
        assert_eq!(updated.status, Rejected);
        assert!(store.confirmed_intervals_for(1).await.unwrap().is_empty());

        assert!(matches!(
            store.update_status(99, Rejected).await,
            Err(StoreError::ReservationNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_find_instance() {
        let store = InMemoryReservationStore::new();
        store.add_instance(
            ApartmentInstance::new(3, "Room 301").with_calendar("https://cal/301.ics"),
        );

        let instance = store.find_instance(3).await.unwrap().unwrap();
        assert_eq!(instance.calendar_urls, vec!["https://cal/301.ics"]);
        assert!(store.find_instance(4).await.unwrap().is_none());
    }
}
