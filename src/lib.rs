//! drivewatch - keeps Google Drive push-notification channels alive for a
//! watched file and dispatches change notifications.

pub mod api;
pub mod auth;
pub mod change;
pub mod channel;
pub mod config;
pub mod drive;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;
pub mod store;
