//! HTTP handlers. Each one maps a request onto a single engine operation.

pub mod auth;
pub mod context;
pub mod oauth;
pub mod well_known;

pub use auth::*;
pub use oauth::*;
pub use well_known::*;
