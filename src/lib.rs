//! Session autopilot: background automation for AI coding sessions and
//! their GitHub pull requests.

pub mod config;
pub mod error;
pub mod github;
pub mod jobs;
pub mod ratelimit;
pub mod remote;
pub mod session;
pub mod settings;
pub mod store;
pub mod validation;
pub mod worker;
