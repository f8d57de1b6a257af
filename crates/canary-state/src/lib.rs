//! canary-state — persisted state for canary rollouts.
//!
//! Backed by [redb](https://docs.rs/redb), stores deployments, their step
//! ladders, analysis metrics records, and rollback records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Child records use composite keys so that a prefix scan returns them in
//! order: steps by `{deployment_id}:{step_number:04}`, metrics and rollbacks by
//! `{deployment_id}:{seq:016}`, where `seq` is a per-deployment counter bumped
//! inside the commit transaction. Appends therefore sort in write order even
//! when their timestamps collide.
//!
//! Every state transition is written through a [`WriteBatch`], which is
//! applied inside a single write transaction: either all of its rows land
//! or none do.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod batch;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use batch::WriteBatch;
pub use error::{StateError, StateResult};
pub use store::{RolloutStore, StateStore};
pub use types::*;
