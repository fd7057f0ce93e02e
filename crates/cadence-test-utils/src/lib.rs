//! In-memory stand-ins for the mail, calendar and classifier providers.

pub mod fixtures;
mod calendar;
mod classifier;
mod mail;

pub use calendar::MockCalendar;
pub use classifier::MockClassifier;
pub use mail::MockMailProvider;
