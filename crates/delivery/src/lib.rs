//! Mail plumbing: compliance suppression, the cross-system send log and
//! dedup guard, template rendering, and the provider-facing transport.

pub mod email;
pub mod send_log;
pub mod suppression;
pub mod templates;

pub use email::TransactionalMailProvider;
pub use send_log::SendLog;
pub use suppression::SuppressionFilter;
