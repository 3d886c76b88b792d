//! Synchronized query cache.
//!
//! [`QueryCache`] holds the last-known server value per [`QueryKey`]. Reads
//! are served from memory while fresh and loaded through a
//! [`QueryFetcher`] otherwise. Realtime events mark entries stale through
//! the [`InvalidationTable`], and [`Mutation`]s patch entries optimistically
//! with snapshot rollback.
//!
//! [`QueryKey`]: cadence_core::QueryKey

pub mod fetcher;
pub mod invalidation;
pub mod optimistic;
pub mod query_cache;

pub use fetcher::{QueryFetcher, RestFetcher};
pub use invalidation::InvalidationTable;
pub use optimistic::{Mutation, MutationReport, MutationState, OptimisticUpdate, Patch};
pub use query_cache::{CacheRead, CacheStats, EntryMeta, QueryCache, DEFAULT_MUTATION_TIMEOUT};
