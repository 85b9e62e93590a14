// Public API for integration tests and the binary

pub mod config;
pub mod error;
pub mod identity;
pub mod login;
pub mod login_log;
pub mod mailer;
pub mod pages;
pub mod problem;
pub mod profile;
pub mod routes;
pub mod session;
pub mod state;
pub mod throttle;
pub mod types;
pub mod validate;

mod fsutil;
