//! The Controller: Session Manager, Ingestion Pipeline, task reconciliation,
//! and the HTTP surfaces (agent fallback + admin) that front the Store.

pub mod admin;
pub mod auth;
pub mod config;
pub mod external_addr;
pub mod http_fallback;
pub mod ingestion;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod ws;

pub use config::ControllerConfig;
pub use server::{router, run, AppState};
