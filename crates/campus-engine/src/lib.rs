//! # campus-engine
//!
//! Time accounting and slot aggregation for a campus intranet client.
//!
//! Raw "location" sessions become per-day hour totals, discrete 15-minute
//! evaluation slots become contiguous display ranges, and fetched results are
//! kept in a persistent TTL cache. Everything here is independent of the
//! network layer; the clock and the storage backend are injected.
//!
//! ## Modules
//!
//! - [`interval`] — Occupancy intervals and the dedup/validation pre-pass
//! - [`aggregate`] — Intervals → daily hour buckets, stats fallback, formatting
//! - [`slots`] — Slot records → merged reserved/free display runs
//! - [`cache`] — TTL cache, blob stores, background sweeper
//! - [`clock`] — Injectable clock and time zone
//! - [`error`] — Error types

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod error;
pub mod interval;
pub mod slots;

pub use aggregate::{aggregate, resolve_daily_hours, DailyBucket, HoursSource};
pub use cache::{spawn_sweeper, BlobStore, FileBlobStore, MemoryBlobStore, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use interval::{intervals_from_records, LocationRecord, TimeInterval};
pub use slots::{merge_slots, DisplaySlot, SlotRecord};
