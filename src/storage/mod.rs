//! # Storage Engine
//!
//! The stateful half of the crate: connection pooling, shard routing,
//! schema management, and the record stores, all behind the single
//! [`Storage`] facade.
//!
//! Internal layering, bottom up:
//!
//! - `schema`: brings a file to the current schema (bootstrap or
//!   additive migration).
//! - `pool`: path-keyed connection cache with opportunistic idle
//!   eviction.
//! - `router`: block height to shard file mapping and the active-shard
//!   binding.
//! - `engine`: the [`Storage`] facade, its two lock domains, startup and
//!   teardown.
//! - `blocks` / `transactions` / `superblocks`: the record stores,
//!   implemented as `impl Storage` blocks.

mod blocks;
mod engine;
mod pool;
mod router;
mod schema;
mod superblocks;
mod transactions;

pub use engine::Storage;
