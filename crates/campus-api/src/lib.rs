//! # campus-api
//!
//! Fetch layer for the campus intranet API.
//!
//! ## Modules
//!
//! - [`config`] — `ApiConfig`, TOML loading and environment overrides
//! - [`error`] — `ApiError` taxonomy and user-facing messages
//! - [`token`] — Token store and refresh seams
//! - [`http`] — Retrying, paginating JSON client
//! - [`models`] — Wire DTOs and their conversion to engine records
//! - [`refresh`] — Refresh generations, stale-while-revalidate sections, periodic tasks
//! - [`service`] — Daily hours and evaluation-slot services

pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod refresh;
pub mod service;
pub mod token;

pub use config::ApiConfig;
pub use error::{ApiError, TransportKind};
pub use http::ApiClient;
pub use refresh::{spawn_periodic, RefreshGeneration, RefreshTicket, Section};
pub use service::{DailyHours, HoursService, SlotService};
pub use token::{MemoryTokenStore, TokenRefresher, TokenStore};
