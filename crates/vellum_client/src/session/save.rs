//! Save orchestration: command building and result reconciliation.
//!
//! A save cycle turns pending deletions and changed entities into an
//! ordered command batch (deletions first, then puts, in encounter order)
//! and reconciles the execution results back into the session, refreshing
//! baselines so reconciled entities are clean again.

use crate::commands::{BatchResult, Command, CommandMethod};
use crate::document::{DocumentRef, RefId};
use crate::error::{SessionError, SessionResult};
use crate::session::DocumentSession;
use crate::transport::BatchExecutor;
use crate::types::DocumentKey;
use std::collections::HashSet;
use tracing::debug;

/// An ordered command batch with its positionally-aligned entities.
///
/// Commands and entities align by index: `entities[i]` is the entity the
/// transport result for `commands[i]` reconciles against.
#[derive(Debug)]
pub struct SaveBatch {
    /// Commands for the batch-execution collaborator, deletions first.
    pub commands: Vec<Command>,
    /// Entities aligned with the commands.
    pub entities: Vec<DocumentRef>,
}

impl SaveBatch {
    /// Returns true when the batch carries no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl DocumentSession {
    /// Builds the command batch for the current session state.
    ///
    /// Attempts one-time transaction enlistment, flushes the deletion set
    /// into delete commands, and appends a put command for every tracked
    /// entity judged changed. Changed entities lose their identity-map
    /// entry here; reconciliation re-binds them, possibly under a
    /// server-assigned key.
    pub fn build_save_batch(&mut self) -> SessionResult<SaveBatch> {
        self.try_enlist();

        let mut commands = Vec::new();
        let mut entities = Vec::new();
        let mut deleted_keys: HashSet<DocumentKey> = HashSet::new();

        let pending: Vec<RefId> = std::mem::take(&mut self.deletions);
        for rid in pending {
            let Some(tracked) = self.entities.remove(&rid) else {
                continue;
            };
            self.order.retain(|id| *id != rid);
            let Some(key) = tracked.meta.key().map(str::to_owned) else {
                continue;
            };
            self.identity.remove(&DocumentKey::new(&key));
            self.listeners
                .notify_before_delete(&key, &tracked.entity, tracked.meta.metadata())?;
            let etag = if self.config.use_optimistic_concurrency {
                tracked.meta.etag()
            } else {
                None
            };
            deleted_keys.insert(DocumentKey::new(&key));
            commands.push(Command::Delete { key, etag });
            entities.push(tracked.entity);
        }

        let order: Vec<RefId> = self.order.clone();
        for rid in order {
            let Some(tracked) = self.entities.get(&rid) else {
                continue;
            };
            if !self.judge_changed(tracked)? {
                continue;
            }
            let Some(key) = tracked.meta.key().map(str::to_owned) else {
                continue;
            };
            if deleted_keys.contains(&DocumentKey::new(&key)) {
                return Err(SessionError::conflicting_write(key));
            }
            let entity = tracked.entity.clone();
            let metadata_snapshot = tracked.meta.metadata().clone();
            self.listeners
                .notify_before_store(&key, &entity, &metadata_snapshot)?;

            // Serialize after the hook so listener edits are captured.
            let Some(tracked) = self.entities.get_mut(&rid) else {
                continue;
            };
            let mut body = tracked.entity.body().clone();
            self.listeners
                .convert(Some(&key), &mut body, tracked.meta.metadata_mut())?;
            let etag = if self.config.use_optimistic_concurrency {
                tracked.meta.etag()
            } else {
                None
            };
            let metadata = tracked.meta.metadata().clone();
            self.identity.remove(&DocumentKey::new(&key));
            commands.push(Command::Put {
                key,
                body,
                metadata,
                etag,
            });
            entities.push(entity);
        }

        debug!(commands = commands.len(), "built save batch");
        Ok(SaveBatch { commands, entities })
    }

    /// Reconciles transport results back into the session.
    ///
    /// Put results re-bind the identity map under the result key, refresh
    /// the entity's metadata, version token and baselines, inject the
    /// resolved key into the entity's identifier slot, and fire the stored
    /// notifications and after-store listeners, in input order. Delete
    /// results need no further map update.
    pub fn reconcile(
        &mut self,
        results: &[BatchResult],
        entities: &[DocumentRef],
    ) -> SessionResult<()> {
        for (result, entity) in results.iter().zip(entities) {
            if result.method != CommandMethod::Put {
                continue;
            }
            let rid = entity.ref_id();
            if !self.entities.contains_key(&rid) {
                continue;
            }
            self.conventions
                .inject_identifier(&mut entity.body_mut(), &result.key);
            let mut baseline_body = entity.body().clone();
            let mut baseline_metadata = result.metadata.clone();
            self.listeners
                .convert(Some(&result.key), &mut baseline_body, &mut baseline_metadata)?;

            let Some(tracked) = self.entities.get_mut(&rid) else {
                continue;
            };
            tracked
                .meta
                .rebind(result.key.clone(), result.etag, result.metadata.clone());
            tracked.meta.freeze_baseline(baseline_body, baseline_metadata);
            self.identity
                .insert(DocumentKey::new(&result.key), entity.clone());

            self.listeners.notify_stored(&result.key, entity);
            self.listeners
                .notify_after_store(&result.key, entity, &result.metadata)?;
        }
        Ok(())
    }

    /// Builds, executes and reconciles one save cycle.
    ///
    /// An empty batch skips the remote call entirely; otherwise one call
    /// is charged against the request budget before execution.
    pub fn save_changes(&mut self, executor: &dyn BatchExecutor) -> SessionResult<()> {
        let batch = self.build_save_batch()?;
        if batch.is_empty() {
            return Ok(());
        }
        self.charge_request()?;
        let results = executor.execute(&batch.commands)?;
        self.reconcile(&results, &batch.entities)
    }
}
