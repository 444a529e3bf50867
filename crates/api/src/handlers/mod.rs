//! Request handlers.
//!
//! Handlers delegate to the upload pipeline or the session store and map
//! errors via [`AppError`](crate::error::AppError).

pub mod sessions;
pub mod users;
