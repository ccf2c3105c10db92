use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::{BackendKind, BlobBackend, ObjectStoreBackend, S3Backend};
use tokio::signal;
use tracing::{error, info, warn};
use vote_store::VoteStore;

use crate::{
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub vote_store: Arc<VoteStore>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let backend: Arc<dyn BlobBackend> = match config.blob_storage.backend {
            BackendKind::Memory => {
                warn!("using the in-memory blob backend, images are lost on restart");
                Arc::new(ObjectStoreBackend::in_memory())
            }
            BackendKind::S3 => Arc::new(
                S3Backend::new(&config.blob_storage)
                    .await
                    .context("error initializing S3 blob backend")?,
            ),
        };

        let vote_store = VoteStore::new(backend, config.store.clone())
            .with_signed_url_expiry(config.blob_storage.signed_url_expiry())
            .with_backend_timeout(config.blob_storage.request_timeout());
        info!(
            backend = ?config.blob_storage.backend,
            write_mode = %vote_store.write_mode(),
            "vote store ready"
        );

        Ok(Self {
            config,
            vote_store: Arc::new(vote_store),
        })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            vote_store: self.vote_store.clone(),
            max_upload_bytes: self.config.upload.max_bytes,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    info!("signal received, shutting down server gracefully");
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_memory_backend_warning_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let service = Service::new(ServerConfig::default()).await.unwrap();
        assert_eq!(service.vote_store.write_mode(), vote_store::WriteMode::Conditional);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("in-memory blob backend"), "{output}");
    }
}
