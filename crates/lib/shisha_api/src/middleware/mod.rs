//! Request gates applied ahead of handlers.

pub mod auth;
pub mod rate_limit;
