//! The `Service` wrapping the watcher's scheduler, managed by `ServiceManager`.

use crate::scheduler::Scheduler;
use crate::services::Service;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct PipelineService {
    scheduler: Arc<Scheduler>,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl PipelineService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            handle: None,
            shutdown_tx: None,
        }
    }

    fn start(&mut self) {
        info!("PipelineService starting");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let scheduler = self.scheduler.clone();
        self.handle = Some(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));
    }
}

#[async_trait::async_trait]
impl Service for PipelineService {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start();
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        info!("shutting down pipeline service");

        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            warn!("no shutdown channel found for pipeline service");
            return Err(anyhow::anyhow!("no shutdown channel available"));
        };
        let _ = shutdown_tx.send(());

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if handle.await.is_err() {
            warn!("pipeline task panicked during shutdown");
            return Err(anyhow::anyhow!("pipeline task panicked"));
        }

        info!("pipeline service shut down gracefully");
        Ok(())
    }
}
