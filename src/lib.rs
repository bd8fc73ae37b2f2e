// Library crate - record model, adapters, dispatch and export

pub mod api;
pub mod classify;
pub mod config;
pub mod csv_export;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod sources;
pub mod types;

// Re-export commonly used types
pub use dispatch::{Dispatcher, FallbackReason, FetchOutcome, FetchRequest};
pub use error::{FetchError, FetchErrorKind};
pub use types::*;
