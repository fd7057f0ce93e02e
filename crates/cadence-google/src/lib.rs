pub mod calendar;
pub mod gmail;
pub mod mime;
pub mod oauth;
mod payload;

pub use calendar::GoogleCalendar;
pub use gmail::GmailClient;
pub use oauth::{GoogleAuth, RefreshHook};
