//! # Saferun
//!
//! Safe invocation of untrusted or slow capability implementations. A wrapper
//! built here looks exactly like the capability it guards; behind it, every
//! call is registered with a process-wide manager, executed on a bounded
//! worker pool, and abandoned once its deadline passes. Failures and timeouts
//! are funneled into caller-supplied hooks instead of propagating
//! uncontrolled or hanging the caller.
//!
//! - [`manager`]: process-wide coordination (records, groups, pool, watchdog)
//! - [`builder`]: fluent per-wrapper configuration
//! - [`guard`]: the interception strategies (blocking and detached)
//! - [`facade`]: the wrapper-factory seam and the `facade!` macro
//! - [`record`]: invocation records and identifiers

pub mod builder;
pub mod facade;
pub mod guard;
pub mod manager;
pub mod record;

#[cfg(test)]
mod tests;
