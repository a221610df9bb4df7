//! One reconciliation attempt inside a single transaction.
//!
//! Order of work:
//! 1. begin
//! 2. lock the instance's address rows and the requested rows owned by
//!    other instances
//! 3. diff current vs requested
//! 4. delete conflicting rows (evictions), then stale rows
//! 5. insert new rows
//! 6. write the payload through the record policy
//! 7. commit
//!
//! Any failure rolls the whole attempt back. The full sequence, commit
//! included, shares one deadline.

use super::diff::AddressDiff;
use super::error::{TransactionError, UpsertStage};
use super::policy::RecordUpserter;
use crate::error::{MetadataError, MetadataResult};
use crate::models::InstanceIpAddressRow;
use crate::repos::{UpsertRepo, UpsertTx};
use cairn_core::InstanceId;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};

/// What a successful attempt changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Rows taken away from other instances.
    pub evicted: Vec<InstanceIpAddressRow>,
    /// Addresses this instance no longer claims.
    pub removed: Vec<String>,
    /// Addresses newly associated with this instance.
    pub added: Vec<String>,
    /// Addresses already associated and left in place.
    pub unchanged: Vec<String>,
}

impl ReconcileOutcome {
    /// True when no association row was inserted or deleted.
    pub fn is_noop(&self) -> bool {
        self.evicted.is_empty() && self.removed.is_empty() && self.added.is_empty()
    }
}

/// Runs single reconciliation attempts with a per-attempt deadline.
#[derive(Clone, Debug)]
pub struct Reconciler {
    tx_timeout: Duration,
}

impl Reconciler {
    pub fn new(tx_timeout: Duration) -> Self {
        Self { tx_timeout }
    }

    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }

    /// Make `instance_id`'s associations equal `requested` and write the
    /// payload, all in one transaction.
    pub async fn reconcile<S>(
        &self,
        store: &S,
        instance_id: &InstanceId,
        requested: &[String],
        policy: &dyn RecordUpserter,
    ) -> Result<ReconcileOutcome, TransactionError>
    where
        S: UpsertRepo + ?Sized,
    {
        let deadline = Instant::now() + self.tx_timeout;

        tracing::debug!(
            instance_id = %instance_id,
            record = policy.kind(),
            requested = ?requested,
            "Starting upsert transaction"
        );

        let mut tx = match timeout_at(deadline, store.begin_upsert()).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => return Err(TransactionError::new(UpsertStage::Begin, e)),
            Err(_) => {
                return Err(TransactionError::new(
                    UpsertStage::Begin,
                    MetadataError::DeadlineExceeded(self.tx_timeout),
                ));
            }
        };

        let mut stage = UpsertStage::Lock;
        let applied = timeout_at(
            deadline,
            apply(tx.as_mut(), instance_id, requested, policy, &mut stage),
        )
        .await;

        let failure = match applied {
            Ok(Ok(outcome)) => return self.commit(tx, deadline, instance_id, outcome).await,
            Ok(Err(e)) => TransactionError::new(stage, e),
            Err(_) => TransactionError::new(stage, MetadataError::DeadlineExceeded(self.tx_timeout)),
        };

        tracing::error!(
            instance_id = %instance_id,
            record = policy.kind(),
            stage = %failure.stage,
            error = %failure.source,
            "Upsert transaction step failed"
        );
        rollback(tx, instance_id, self.tx_timeout).await;

        Err(failure)
    }

    async fn commit(
        &self,
        tx: Box<dyn UpsertTx>,
        deadline: Instant,
        instance_id: &InstanceId,
        outcome: ReconcileOutcome,
    ) -> Result<ReconcileOutcome, TransactionError> {
        // A commit cut off by the deadline drops the transaction, which
        // rolls it back.
        let source = match timeout_at(deadline, tx.commit()).await {
            Ok(Ok(())) => return Ok(outcome),
            Ok(Err(e)) => e,
            Err(_) => MetadataError::DeadlineExceeded(self.tx_timeout),
        };

        tracing::warn!(
            instance_id = %instance_id,
            error = %source,
            "Unable to commit upsert transaction"
        );
        Err(TransactionError::new(UpsertStage::Commit, source))
    }
}

async fn apply(
    tx: &mut dyn UpsertTx,
    instance_id: &InstanceId,
    requested: &[String],
    policy: &dyn RecordUpserter,
    stage: &mut UpsertStage,
) -> MetadataResult<ReconcileOutcome> {
    let id = instance_id.as_str();

    *stage = UpsertStage::Lock;
    let current = tx.lock_instance_addresses(id).await?;
    let conflicts = tx.lock_conflicting_addresses(id, requested).await?;

    let diff = AddressDiff::compute(&current, requested);

    *stage = UpsertStage::DeleteConflicts;
    for row in &conflicts {
        tracing::warn!(
            instance_id = %instance_id,
            address = %row.address,
            previous_owner = %row.instance_id,
            "Evicting address from previous owner"
        );
        tx.delete_address(row).await?;
    }

    *stage = UpsertStage::DeleteStale;
    for row in &diff.stale {
        tx.delete_address(row).await?;
    }

    *stage = UpsertStage::InsertNew;
    for address in &diff.new {
        tx.insert_address(&InstanceIpAddressRow::new(id, *address)).await?;
    }

    *stage = UpsertStage::UpsertRecord;
    policy.upsert(tx).await?;

    Ok(ReconcileOutcome {
        removed: diff.stale.iter().map(|r| r.address.clone()).collect(),
        added: diff.new.iter().map(|a| a.to_string()).collect(),
        unchanged: diff.unchanged.iter().map(|r| r.address.clone()).collect(),
        evicted: conflicts,
    })
}

/// Roll back, giving up after `limit`. Failures here never replace the
/// step error returned to the caller.
async fn rollback(tx: Box<dyn UpsertTx>, instance_id: &InstanceId, limit: Duration) {
    tracing::warn!(instance_id = %instance_id, "Rolling back upsert transaction");
    match timeout(limit, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(
                instance_id = %instance_id,
                error = %e,
                "Could not roll back upsert transaction"
            );
        }
        // The abandoned transaction is rolled back when dropped.
        Err(_) => {
            tracing::error!(
                instance_id = %instance_id,
                timeout_ms = limit.as_millis() as u64,
                "Rollback timed out, dropping upsert transaction"
            );
        }
    }
}
