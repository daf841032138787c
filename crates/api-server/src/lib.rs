//! HTTP surface: enrollment endpoints, the scheduler trigger, tracking
//! callbacks, and health.

pub mod rest;
pub mod server;

pub use rest::AppState;
pub use server::{build_router, serve};
