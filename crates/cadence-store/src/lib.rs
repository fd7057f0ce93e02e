mod executions;
mod messages;
mod store;

pub use store::SqliteStore;
