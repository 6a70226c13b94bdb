//! Coding sessions: state machine, records and service.

pub mod model;
pub mod service;

pub use model::{Session, SessionFilter, SessionState};
pub use service::SessionService;
