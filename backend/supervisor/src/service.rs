//! Production service: builds the pools, binds the endpoint and serves.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ocrforge_config::OcrConfig;
use ocrforge_core::RecognizerFactory;
use ocrforge_executor::{RecognizerPool, SlotRecycler, WorkerPool};
use ocrforge_gateway::{OcrServer, ResourceGovernor, ServerStats, SessionHandler, SessionLimits};
use ocrforge_recognizer::{TesseractFactory, TesseractSettings};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::Service;

pub struct OcrService {
    config: OcrConfig,
    factory: Arc<dyn RecognizerFactory>,
}

impl OcrService {
    pub fn new(config: OcrConfig, factory: Arc<dyn RecognizerFactory>) -> Self {
        Self { config, factory }
    }

    /// Service backed by the `tesseract` command configured under `engine`.
    pub fn with_tesseract(config: OcrConfig) -> Self {
        let settings = TesseractSettings {
            command: config.engine.command.clone(),
            language: config.engine.language.clone(),
            page_seg_mode: config.engine.page_seg_mode,
        };
        Self::new(config, Arc::new(TesseractFactory::new(settings)))
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }
}

#[async_trait]
impl Service for OcrService {
    fn name(&self) -> &str {
        "ocr-server"
    }

    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let server_cfg = &self.config.server;
        let threads = self.config.workers.threads;
        let addr = server_cfg.socket_addr()?;

        let workers = Arc::new(WorkerPool::new(threads).context("failed to start worker pool")?);
        let recognizers = Arc::new(
            RecognizerPool::new(Arc::clone(&self.factory), threads)
                .context("failed to initialise recognizer pool")?,
        );
        let recycler = SlotRecycler::start(
            Arc::clone(&recognizers),
            self.config.workers.recycle_interval(),
        )
        .context("failed to start slot recycler")?;

        let governor = Arc::new(ResourceGovernor::new(
            self.config.limits.max_in_flight_bytes,
            self.config.limits.max_in_flight_jobs,
        ));
        let stats = Arc::new(ServerStats::new());
        let limits = SessionLimits {
            max_message_size: server_cfg.max_message_size,
            max_in_flight: self.config.limits.session_max_in_flight.unwrap_or(threads),
        };
        let handler = Arc::new(SessionHandler::new(
            Arc::clone(&workers),
            recognizers,
            governor,
            Arc::clone(&stats),
            limits,
        ));

        let served = match OcrServer::bind(addr, handler, server_cfg.shutdown_grace()).await {
            Ok(server) => server.serve(shutdown).await,
            Err(e) => Err(e),
        };

        tokio::task::spawn_blocking(move || {
            recycler.shutdown();
            match Arc::try_unwrap(workers) {
                Ok(pool) => pool.shutdown(),
                Err(shared) => {
                    // An aborted session still holds a handle.
                    warn!("Worker pool still shared at teardown; draining in place");
                    shared.close();
                    shared.drain();
                }
            }
        })
        .await
        .context("teardown task failed")?;

        match serde_json::to_string(&stats.snapshot()) {
            Ok(json) => info!(stats = %json, "Server stopped"),
            Err(e) => warn!(error = %e, "Failed to serialize server stats"),
        }

        served.map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use crate::restart::RestartPolicy;
    use crate::supervisor::Supervisor;
    use ocrforge_core::{RecognizeError, Recognizer};
    use std::time::Duration;

    struct Echo;

    impl Recognizer for Echo {
        fn recognize(&mut self, image: &[u8]) -> Result<String, RecognizeError> {
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    fn service(port: u16) -> OcrService {
        let mut config = OcrConfig::default();
        config.server.address = "127.0.0.1".to_string();
        config.server.port = port;
        config.server.shutdown_grace_secs = 1;
        config.workers.threads = 2;
        let factory: Arc<dyn RecognizerFactory> =
            Arc::new(|| -> Result<Box<dyn Recognizer>, RecognizeError> { Ok(Box::new(Echo)) });
        OcrService::new(config, factory)
    }

    #[tokio::test]
    async fn port_conflict_exhausts_restarts() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let supervisor = Supervisor::new(
            RestartPolicy::new(1, Duration::from_millis(10)),
            CancellationToken::new(),
        );
        let err = supervisor.run(&service(port)).await.unwrap_err();

        let SupervisorError::RestartLimitExceeded { restarts, last_error } = err;
        assert_eq!(restarts, 1);
        assert!(last_error.contains("failed to bind"), "{last_error}");
    }

    #[tokio::test]
    async fn cancelled_service_stops_cleanly() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let supervisor = Supervisor::new(RestartPolicy::default(), shutdown);
        let report = supervisor.run(&service(0)).await.unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.restarts, 0);
    }

    #[test]
    fn tesseract_settings_follow_engine_config() {
        let mut config = OcrConfig::default();
        config.engine.language = "deu".to_string();
        let service = OcrService::with_tesseract(config);
        assert_eq!(service.factory.name(), "tesseract");
        assert_eq!(service.config().engine.language, "deu");
    }
}
