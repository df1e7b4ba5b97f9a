//! Resumable chunked video uploads: form validation, metadata records,
//! upload credentials, a tus 1.0.0 transfer driver and status reconciliation.

pub mod api;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod identity;
pub mod store;
pub mod upload;
pub mod video;
