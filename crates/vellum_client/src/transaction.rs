//! Ambient-transaction enlistment.
//!
//! A session joins an ambient distributed transaction at most once. The
//! first save cycle with a transaction present tries promotable
//! single-phase enlistment (the store as sole participant); if the
//! transaction refuses, the session falls back to durable two-phase
//! enlistment under its resource-manager identifier. Commit, rollback and
//! promotion are driven by the external coordinator through the
//! participant, never by the session.

use crate::error::SessionResult;
use crate::types::TxId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// The store-side participant driven by the external coordinator.
///
/// These entry points may be invoked from a different execution context
/// than the originating session thread during transaction promotion.
pub trait TransactionParticipant: Send + Sync {
    /// Commits the work enlisted under the given transaction.
    fn commit(&self, tx: TxId) -> SessionResult<()>;

    /// Rolls back the work enlisted under the given transaction.
    fn rollback(&self, tx: TxId) -> SessionResult<()>;

    /// Promotes the transaction, returning an opaque promotion cookie.
    fn promote(&self, tx: TxId) -> SessionResult<Vec<u8>>;
}

/// An ambient transaction a session may join.
///
/// Sessions receive the handle explicitly at creation; there is no
/// process-wide ambient lookup.
pub trait AmbientTransaction {
    /// Returns the transaction identity.
    fn id(&self) -> TxId;

    /// Attempts promotable single-phase enlistment.
    ///
    /// Returns false when the transaction does not support single-phase
    /// participation, in which case the caller falls back to durable
    /// enlistment.
    fn enlist_promotable_single_phase(&self, participant: Arc<dyn TransactionParticipant>) -> bool;

    /// Performs durable two-phase enlistment.
    fn enlist_durable(
        &self,
        resource_manager_id: Uuid,
        participant: Arc<dyn TransactionParticipant>,
    );
}

/// Exactly-once enlistment latch for one session.
#[derive(Debug, Default)]
pub struct Enlistment {
    enlisted: AtomicBool,
}

impl Enlistment {
    /// Creates an unenlisted latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the session has joined a transaction.
    #[must_use]
    pub fn is_enlisted(&self) -> bool {
        self.enlisted.load(Ordering::SeqCst)
    }

    /// Resets the latch so a reused session can join a new transaction.
    pub fn reset(&self) {
        self.enlisted.store(false, Ordering::SeqCst);
    }

    /// Joins the transaction unless already enlisted.
    ///
    /// Returns true when this call performed the enlistment. The attempt is
    /// never retried for the session's lifetime, even if the underlying
    /// join is logically reversible.
    pub fn ensure_enlisted(
        &self,
        tx: &dyn AmbientTransaction,
        resource_manager_id: Uuid,
        participant: Arc<dyn TransactionParticipant>,
    ) -> bool {
        if self
            .enlisted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if tx.enlist_promotable_single_phase(Arc::clone(&participant)) {
            debug!(tx = %tx.id(), "enlisted promotable single-phase");
        } else {
            tx.enlist_durable(resource_manager_id, participant);
            debug!(tx = %tx.id(), "enlisted durable two-phase");
        }
        true
    }
}

/// A participant that acknowledges every coordinator callback.
#[derive(Debug, Default)]
pub struct NoopParticipant;

impl TransactionParticipant for NoopParticipant {
    fn commit(&self, _tx: TxId) -> SessionResult<()> {
        Ok(())
    }

    fn rollback(&self, _tx: TxId) -> SessionResult<()> {
        Ok(())
    }

    fn promote(&self, _tx: TxId) -> SessionResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// An ambient transaction for testing that records enlistment calls.
#[derive(Debug)]
pub struct MockAmbientTransaction {
    id: TxId,
    supports_promotable: bool,
    promotable_enlistments: AtomicUsize,
    durable_enlistments: AtomicUsize,
}

impl MockAmbientTransaction {
    /// Creates a mock transaction.
    #[must_use]
    pub fn new(supports_promotable: bool) -> Self {
        Self {
            id: TxId::new(),
            supports_promotable,
            promotable_enlistments: AtomicUsize::new(0),
            durable_enlistments: AtomicUsize::new(0),
        }
    }

    /// Returns the number of promotable single-phase enlistments accepted.
    #[must_use]
    pub fn promotable_enlistments(&self) -> usize {
        self.promotable_enlistments.load(Ordering::SeqCst)
    }

    /// Returns the number of durable enlistments observed.
    #[must_use]
    pub fn durable_enlistments(&self) -> usize {
        self.durable_enlistments.load(Ordering::SeqCst)
    }

    /// Returns the total number of enlistments performed.
    #[must_use]
    pub fn enlistments(&self) -> usize {
        self.promotable_enlistments() + self.durable_enlistments()
    }
}

impl AmbientTransaction for MockAmbientTransaction {
    fn id(&self) -> TxId {
        self.id
    }

    fn enlist_promotable_single_phase(
        &self,
        _participant: Arc<dyn TransactionParticipant>,
    ) -> bool {
        if self.supports_promotable {
            self.promotable_enlistments.fetch_add(1, Ordering::SeqCst);
        }
        self.supports_promotable
    }

    fn enlist_durable(
        &self,
        _resource_manager_id: Uuid,
        _participant: Arc<dyn TransactionParticipant>,
    ) {
        self.durable_enlistments.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enlists_exactly_once() {
        let enlistment = Enlistment::new();
        let tx = MockAmbientTransaction::new(true);
        let participant: Arc<dyn TransactionParticipant> = Arc::new(NoopParticipant);

        assert!(enlistment.ensure_enlisted(&tx, Uuid::nil(), Arc::clone(&participant)));
        assert!(!enlistment.ensure_enlisted(&tx, Uuid::nil(), participant));

        assert!(enlistment.is_enlisted());
        assert_eq!(tx.enlistments(), 1);
        assert_eq!(tx.promotable_enlistments(), 1);
    }

    #[test]
    fn falls_back_to_durable() {
        let enlistment = Enlistment::new();
        let tx = MockAmbientTransaction::new(false);
        let participant: Arc<dyn TransactionParticipant> = Arc::new(NoopParticipant);

        assert!(enlistment.ensure_enlisted(&tx, Uuid::new_v4(), participant));
        assert_eq!(tx.promotable_enlistments(), 0);
        assert_eq!(tx.durable_enlistments(), 1);
    }

    #[test]
    fn reset_allows_reenlistment() {
        let enlistment = Enlistment::new();
        let tx = MockAmbientTransaction::new(true);
        let participant: Arc<dyn TransactionParticipant> = Arc::new(NoopParticipant);

        enlistment.ensure_enlisted(&tx, Uuid::nil(), Arc::clone(&participant));
        enlistment.reset();
        assert!(!enlistment.is_enlisted());

        assert!(enlistment.ensure_enlisted(&tx, Uuid::nil(), participant));
        assert_eq!(tx.enlistments(), 2);
    }

    #[test]
    fn noop_participant_acknowledges() {
        let participant = NoopParticipant;
        let tx = TxId::new();
        participant.commit(tx).unwrap();
        participant.rollback(tx).unwrap();
        assert!(participant.promote(tx).unwrap().is_empty());
    }
}
