//! Timer-driven key rotation for a master, with a pluggable channel that
//! carries each new key export to the slaves.
#![cfg(feature = "async")]

use crate::error::Error;
use crate::key::ExportedBlockKeys;
use crate::manager::BlockTokenSecretManager;
use crate::pool::BlockPoolTokenSecretManager;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Delivers a master's key export to the nodes that verify its tokens.
///
/// 把主节点导出的密钥送达各校验节点。
#[async_trait]
pub trait KeyDistributor: Send + Sync {
    async fn distribute(&self, keys: &ExportedBlockKeys) -> Result<(), Error>;
}

/// Distributes to slave managers living in the same process.
#[derive(Debug, Default)]
pub struct InMemoryDistributor {
    slaves: Vec<Arc<BlockTokenSecretManager>>,
    pools: Vec<(Arc<BlockPoolTokenSecretManager>, String)>,
}

impl InMemoryDistributor {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_slave(mut self, slave: Arc<BlockTokenSecretManager>) -> Self {
        self.slaves.push(slave);
        self
    }

    pub fn with_pool(mut self, registry: Arc<BlockPoolTokenSecretManager>, pool_id: &str) -> Self {
        self.pools.push((registry, pool_id.to_string()));
        self
    }
}

#[async_trait]
impl KeyDistributor for InMemoryDistributor {
    async fn distribute(&self, keys: &ExportedBlockKeys) -> Result<(), Error> {
        for slave in &self.slaves {
            slave.set_keys(keys)?;
        }
        for (registry, pool_id) in &self.pools {
            registry.set_keys(pool_id, keys)?;
        }
        Ok(())
    }
}

/// A background task that calls `rotate_if_due` on every tick and pushes
/// the export after each rotation.
///
/// A rotation error stops the task; a distribution error is retried on the
/// next tick. Dropping the handle stops the task as well.
///
/// 后台密钥轮换任务。
pub struct KeyRotationTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), Error>>,
}

impl KeyRotationTask {
    pub fn spawn<D>(manager: Arc<BlockTokenSecretManager>, distributor: Arc<D>, check_period: Duration) -> Self
    where
        D: KeyDistributor + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 启动后先分发一次当前密钥
            let mut pending = true;
            loop {
                tokio::select! {
                    _ = &mut rx => return Ok(()),
                    _ = ticker.tick() => {}
                }
                match manager.rotate_if_due() {
                    Ok(rotated) => pending |= rotated,
                    Err(e) => {
                        tracing::error!(error = %e, "block key rotation failed, stopping rotation task");
                        return Err(e);
                    }
                }
                if pending {
                    let keys = manager.export_keys()?;
                    match distributor.distribute(&keys).await {
                        Ok(()) => {
                            tracing::debug!(key_ids = ?keys.key_ids(), "distributed block keys");
                            pending = false;
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to distribute block keys, will retry"),
                    }
                }
            }
        });
        Self {
            shutdown: Some(tx),
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 停止任务并返回其结束状态
    pub async fn shutdown(mut self) -> Result<(), Error> {
        if let Some(tx) = self.shutdown.take() {
            // 任务可能已经退出
            let _ = tx.send(());
        }
        self.join().await
    }

    /// 等待任务自行结束
    pub async fn join(self) -> Result<(), Error> {
        self.handle
            .await
            .map_err(|e| Error::Rotation(format!("rotation task did not complete: {e}")))?
    }
}
