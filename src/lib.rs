// Apartment booking core: reservation availability against external iCal feeds,
// the conflict guard for committing reservations, and account notification emails

pub mod accounts;
pub mod availability;
pub mod calendar;
pub mod config;
pub mod email;
pub mod error;
pub mod ical_parser;
pub mod interval;
pub mod reservation;
pub mod token;

// Re-export key types for convenience
pub use accounts::{AccountError, AccountNotifier};
pub use availability::AvailabilityService;
pub use calendar::{CalendarError, CalendarSource, Event, HttpCalendarSource};
pub use config::{BookingConfig, CalendarConfig, ConfigError, EmailConfig, TokenConfig};
pub use email::{DeliveryHandle, Email, EmailDispatcher, EmailError, EmailKind, Mailer};
pub use error::BookingError;
pub use ical_parser::CalendarParser;
pub use interval::{Interval, InvalidIntervalError};
pub use reservation::{
    ApartmentInstance, InMemoryReservationStore, Reservation, ReservationRequest,
    ReservationStatus, ReservationStore, StoreError,
};
pub use token::{CodeGenerator, Token, TokenError, TokenRegistry};
