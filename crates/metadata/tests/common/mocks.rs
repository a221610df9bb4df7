//! Scripted in-memory transactions for exercising failure paths that real
//! databases do not produce on demand.

use async_trait::async_trait;
use cairn_metadata::models::{InstanceIpAddressRow, InstanceMetadataRow, InstanceUserdataRow};
use cairn_metadata::repos::{UpsertRepo, UpsertTx};
use cairn_metadata::{MetadataError, MetadataResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the scripted transactions misbehave.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// `insert_address` fails with this message.
    pub insert_error: Option<String>,
    /// The first N commits fail.
    pub failing_commits: u32,
    /// `rollback` fails with this message.
    pub rollback_error: Option<String>,
    /// `rollback` stalls this long before returning.
    pub rollback_stall: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    script: Script,
    begins: AtomicU32,
    commits: AtomicU32,
    rollbacks: AtomicU32,
    events: Mutex<Vec<String>>,
}

impl Shared {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

/// Store whose transactions follow a [`Script`] and log every call.
#[derive(Clone)]
pub struct ScriptedStore {
    shared: Arc<Shared>,
}

impl ScriptedStore {
    pub fn new(script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                ..Default::default()
            }),
        }
    }

    pub fn begins(&self) -> u32 {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.shared.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpsertRepo for ScriptedStore {
    async fn begin_upsert(&self) -> MetadataResult<Box<dyn UpsertTx>> {
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        self.shared.record("begin");
        Ok(Box::new(ScriptedTx {
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedTx {
    shared: Arc<Shared>,
}

#[async_trait]
impl UpsertTx for ScriptedTx {
    async fn lock_instance_addresses(
        &mut self,
        _instance_id: &str,
    ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
        self.shared.record("lock_instance");
        Ok(Vec::new())
    }

    async fn lock_conflicting_addresses(
        &mut self,
        _instance_id: &str,
        _addresses: &[String],
    ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
        self.shared.record("lock_conflicts");
        Ok(Vec::new())
    }

    async fn delete_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
        self.shared.record(format!("delete {}", row.address));
        Ok(())
    }

    async fn insert_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
        self.shared.record(format!("insert {}", row.address));
        match &self.shared.script.insert_error {
            Some(msg) => Err(MetadataError::Internal(msg.clone())),
            None => Ok(()),
        }
    }

    async fn upsert_metadata(&mut self, row: &InstanceMetadataRow) -> MetadataResult<()> {
        self.shared.record(format!("upsert_metadata {}", row.id));
        Ok(())
    }

    async fn upsert_userdata(&mut self, row: &InstanceUserdataRow) -> MetadataResult<()> {
        self.shared.record(format!("upsert_userdata {}", row.id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        let n = self.shared.commits.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.record("commit");
        if n <= self.shared.script.failing_commits {
            return Err(MetadataError::Internal(format!(
                "could not serialize access (commit {n})"
            )));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.shared.record("rollback");
        if let Some(stall) = self.shared.script.rollback_stall {
            tokio::time::sleep(stall).await;
        }
        match &self.shared.script.rollback_error {
            Some(msg) => Err(MetadataError::Internal(msg.clone())),
            None => Ok(()),
        }
    }
}
