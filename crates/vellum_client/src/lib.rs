//! # Vellum Client
//!
//! Client-side unit-of-work engine for VellumDB document sessions.
//!
//! This crate provides:
//! - Identity map and tracker with reference-identity entity registration
//! - Structural change detection against frozen baselines
//! - Ordered command-batch construction and result reconciliation
//! - Exactly-once ambient-transaction enlistment
//! - Request-budget and non-authoritative read guards
//!
//! ## Architecture
//!
//! A [`DocumentSession`] confines one logical unit of work. Documents
//! hydrate into live entities whose baselines are frozen at load; callers
//! mutate entities in place; a save cycle diffs live state against the
//! baselines, builds a minimal ordered command batch (deletions first,
//! then puts), hands it to the batch-execution collaborator, and
//! reconciles the results so saved entities are clean again.
//!
//! The session performs no network I/O: fetching, batch execution and key
//! generation are collaborator traits in [`transport`].
//!
//! ## Key Invariants
//!
//! - At most one in-memory entity per document key, compared
//!   case-insensitively
//! - Baselines change only at hydrate, fresh store, and reconciliation
//! - A freshly stored entity is dirty until its first successful save
//! - A session enlists in an ambient transaction at most once

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod changes;
pub mod commands;
pub mod config;
pub mod conventions;
pub mod document;
pub mod error;
pub mod guards;
pub mod listeners;
pub mod session;
pub mod transaction;
pub mod transport;
pub mod types;

pub use changes::structural_eq;
pub use commands::{BatchResult, Command, CommandMethod};
pub use config::SessionConfig;
pub use conventions::{Conventions, IdentitySlot};
pub use document::{DocumentMetadata, DocumentRef, RefId};
pub use error::{SessionError, SessionResult};
pub use guards::RequestBudget;
pub use listeners::{
    ConversionListener, DeleteListener, ListenerRegistry, StoreListener, StoredNotification,
};
pub use session::{DocumentSession, SaveBatch};
pub use transaction::{
    AmbientTransaction, Enlistment, MockAmbientTransaction, NoopParticipant,
    TransactionParticipant,
};
pub use transport::{BatchExecutor, DocumentFetcher, FetchedDocument, InMemoryStore, KeyGenerator};
pub use types::{DocumentKey, Etag, TxId};
