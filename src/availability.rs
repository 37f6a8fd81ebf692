// Availability checks and the reservation conflict guard
// Busy time is the union of external calendar events and CONFIRMED local reservations

use crate::calendar::{CalendarError, CalendarSource, Event};
use crate::config::{CalendarConfig, ConfigError};
use crate::error::BookingError;
use crate::ical_parser::CalendarParser;
use crate::interval::Interval;
use crate::reservation::{
    ApartmentInstance, ApartmentInstanceId, NewReservation, Reservation, ReservationId,
    ReservationRequest, ReservationStatus, ReservationStore,
};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct AvailabilityService {
    store: Arc<dyn ReservationStore>,
    source: Arc<dyn CalendarSource>,
    parser: CalendarParser,
    fetch_timeout: Duration,
    // One commit lock per apartment instance, unrelated instances never wait on each other
    commit_locks: DashMap<ApartmentInstanceId, Arc<Mutex<()>>>,
}

impl AvailabilityService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        source: Arc<dyn CalendarSource>,
        config: &CalendarConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            source,
            parser: CalendarParser::new(config.utc_offset()?),
            fetch_timeout: config.fetch_timeout(),
            commit_locks: DashMap::new(),
        })
    }

    // External events of every calendar configured on the instance.
    // A source that cannot be fetched or parsed is skipped with a warning,
    // the remaining sources still contribute their events.
    pub async fn events_for(&self, instance: &ApartmentInstance) -> Vec<Event> {
        let fetches = instance
            .calendar_urls
            .iter()
            .map(|url| self.events_from(url));

        let mut events = Vec::new();
        for (url, result) in instance.calendar_urls.iter().zip(join_all(fetches).await) {
            match result {
                Ok(found) => events.extend(found),
                Err(e) => tracing::warn!(
                    instance_id = instance.id,
                    url = url.as_str(),
                    error = %e,
                    "skipping unavailable calendar source"
                ),
            }
        }
        events
    }

    async fn events_from(&self, url: &str) -> Result<Vec<Event>, CalendarError> {
        let raw = tokio::time::timeout(self.fetch_timeout, self.source.fetch(url))
            .await
            .map_err(|_| CalendarError::Timeout {
                url: url.to_string(),
                timeout_ms: self.fetch_timeout.as_millis() as u64,
            })??;
        self.parser.parse(&raw, Some(url))
    }

    pub async fn is_free(
        &self,
        instance_id: ApartmentInstanceId,
        interval: &Interval,
    ) -> Result<bool, BookingError> {
        let instance = self.instance(instance_id).await?;
        self.is_free_for(&instance, interval).await
    }

    async fn is_free_for(
        &self,
        instance: &ApartmentInstance,
        interval: &Interval,
    ) -> Result<bool, BookingError> {
        let events = self.events_for(instance).await;
        let confirmed = self.store.confirmed_intervals_for(instance.id).await?;

        let conflict = events
            .iter()
            .map(|event| &event.interval)
            .chain(confirmed.iter())
            .find(|busy| busy.overlaps(interval));

        if let Some(busy) = conflict {
            tracing::debug!(instance_id = instance.id, %interval, %busy, "interval is occupied");
            return Ok(false);
        }
        Ok(true)
    }

    // Checks and commits a CONFIRMED reservation under the instance's commit lock.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        let instance = self.instance(request.apartment_instance_id).await?;
        let _guard = self.lock_instance(instance.id).await;

        self.ensure_free(&instance, &request.interval).await?;
        let reservation = self
            .store
            .persist(NewReservation {
                request,
                status: ReservationStatus::Confirmed,
            })
            .await?;

        tracing::info!(
            reservation_id = reservation.id,
            instance_id = instance.id,
            interval = %reservation.interval,
            "reservation confirmed"
        );
        Ok(reservation)
    }

    // Records a PENDING reservation. It does not occupy the calendar until confirmed.
    pub async fn submit(&self, request: ReservationRequest) -> Result<Reservation, BookingError> {
        self.instance(request.apartment_instance_id).await?;
        let reservation = self
            .store
            .persist(NewReservation {
                request,
                status: ReservationStatus::Pending,
            })
            .await?;
        tracing::info!(reservation_id = reservation.id, "reservation submitted");
        Ok(reservation)
    }

    pub async fn confirm_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let current = self.reservation(id).await?;
        let _guard = self.lock_instance(current.apartment_instance_id).await;

        // Re-read under the lock, a concurrent reject may have won
        let current = self.reservation(id).await?;
        self.ensure_transition(&current, ReservationStatus::Confirmed)?;
        let instance = self.instance(current.apartment_instance_id).await?;
        self.ensure_free(&instance, &current.interval).await?;

        let confirmed = self
            .store
            .update_status(id, ReservationStatus::Confirmed)
            .await?;
        tracing::info!(reservation_id = id, "reservation confirmed");
        Ok(confirmed)
    }

    // Rejects or cancels a reservation, freeing its interval.
    // Rejecting an already rejected reservation is a no-op.
    pub async fn reject_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let current = self.reservation(id).await?;
        let _guard = self.lock_instance(current.apartment_instance_id).await;

        let current = self.reservation(id).await?;
        if current.status == ReservationStatus::Rejected {
            tracing::debug!(reservation_id = id, "reservation already rejected");
            return Ok(current);
        }
        self.ensure_transition(&current, ReservationStatus::Rejected)?;

        let rejected = self
            .store
            .update_status(id, ReservationStatus::Rejected)
            .await?;
        tracing::info!(reservation_id = id, previous = %current.status, "reservation rejected");
        Ok(rejected)
    }

    async fn ensure_free(
        &self,
        instance: &ApartmentInstance,
        interval: &Interval,
    ) -> Result<(), BookingError> {
        if !self.is_free_for(instance, interval).await? {
            tracing::info!(instance_id = instance.id, %interval, "reservation conflict");
            return Err(BookingError::ReservationConflict {
                instance_id: instance.id,
                interval: *interval,
            });
        }
        Ok(())
    }

    fn ensure_transition(
        &self,
        reservation: &Reservation,
        next: ReservationStatus,
    ) -> Result<(), BookingError> {
        if !reservation.status.can_transition_to(next) {
            return Err(BookingError::IllegalTransition {
                id: reservation.id,
                from: reservation.status,
                to: next,
            });
        }
        Ok(())
    }

    async fn lock_instance(&self, instance_id: ApartmentInstanceId) -> CommitGuard<'_> {
        let lock = self
            .commit_locks
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        CommitGuard {
            locks: &self.commit_locks,
            instance_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn instance(&self, id: ApartmentInstanceId) -> Result<ApartmentInstance, BookingError> {
        self.store
            .find_instance(id)
            .await?
            .ok_or(BookingError::ApartmentInstanceNotFound(id))
    }

    async fn reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.store
            .find_reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))
    }
}

// Holds an instance's commit lock and evicts it from the arena once nobody else holds or awaits it
struct CommitGuard<'a> {
    locks: &'a DashMap<ApartmentInstanceId, Arc<Mutex<()>>>,
    instance_id: ApartmentInstanceId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.instance_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
