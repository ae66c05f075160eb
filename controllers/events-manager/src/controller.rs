//! Main controller implementation.
//!
//! Wires the event sink together and supervises its long-running loops:
//! - the annotator draining the annotation queue
//! - the event sink server accepting machine streams
//! - the shutdown watcher turning SIGINT/SIGTERM into cancellation
//! - the metrics endpoint, when enabled
//!
//! All loops share one cancellation token. The first loop to fail with a
//! non-benign error cancels the others and becomes the process result.

use crate::config::Config;
use crate::error::ControllerError;
use crate::http;
use event_sink::{Adapter, Annotator, AnnotatorConfig, EventSinkServer, SinkMetrics};
use metal_store::ObjectStore;
use prometheus::Registry;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

type LoopResult = (&'static str, Result<(), ControllerError>);

async fn bind(port: u16) -> Result<TcpListener, ControllerError> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(address)
        .await
        .map_err(|source| ControllerError::Bind { address, source })
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Events Manager controller.
pub struct Controller<S> {
    config: Config,
    store: Arc<S>,
    registry: Registry,
    sink_listener: TcpListener,
    metrics_listener: Option<TcpListener>,
}

impl<S> std::fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore + 'static> Controller<S> {
    /// Creates a new controller instance, binding its listeners.
    ///
    /// Bind failures are returned here so the process never starts serving
    /// half configured.
    pub async fn new(config: Config, store: S) -> Result<Self, ControllerError> {
        info!("Initializing Events Manager");

        let sink_listener = bind(config.events_sink_port).await?;
        let metrics_listener = match config.metrics_port {
            Some(port) => Some(bind(port).await?),
            None => None,
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            registry: Registry::new(),
            sink_listener,
            metrics_listener,
        })
    }

    /// Runs until a termination signal arrives or `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let Controller {
            config,
            store,
            registry,
            sink_listener,
            metrics_listener,
        } = self;

        let metrics = SinkMetrics::new(&registry)?;
        let annotator_config = AnnotatorConfig {
            namespace: config.namespace.clone(),
            ..AnnotatorConfig::default()
        };
        let (annotator, handle) = Annotator::new(
            store,
            annotator_config,
            metrics.clone(),
            info_span!("annotator", component = "annotator"),
        );
        let adapter = Adapter::new(
            handle,
            Arc::new(config.negative_address_filter),
            metrics.clone(),
            info_span!("sink", component = "sink"),
        );
        let server = EventSinkServer::new(adapter, metrics, info_span!("server", component = "server"));

        let mut loops: JoinSet<LoopResult> = JoinSet::new();

        let token = shutdown.clone();
        loops.spawn(async move { ("annotator", annotator.run(token).await.map_err(ControllerError::from)) });

        let token = shutdown.clone();
        loops.spawn(async move { ("server", server.serve(sink_listener, token).await.map_err(ControllerError::from)) });

        let token = shutdown.clone();
        loops.spawn(async move {
            tokio::select! {
                _ = termination_signal() => {
                    info!("Termination signal received, shutting down");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
            ("shutdown watcher", Ok(()))
        });

        if let Some(listener) = metrics_listener {
            let token = shutdown.clone();
            loops.spawn(async move { ("metrics endpoint", http::serve(listener, registry, token).await) });
        }

        info!("Events Manager running");

        let mut outcome = Ok(());
        while let Some(joined) = loops.join_next().await {
            let (name, result) = match joined {
                Ok(finished) => finished,
                Err(e) => ("supervised task", Err(ControllerError::from(e))),
            };

            match result {
                Ok(()) => debug!(loop_name = name, "Loop finished"),
                Err(e) if e.is_benign() => debug!(loop_name = name, error = %e, "Loop stopped"),
                Err(e) => {
                    error!(loop_name = name, error = %e, "Loop failed, shutting down");
                    shutdown.cancel();
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }

        info!("Events Manager stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_sink::NegativeFilter;
    use metal_store::MockObjectStore;
    use std::time::Duration;

    fn config(metrics_port: Option<u16>) -> Config {
        Config {
            negative_address_filter: NegativeFilter::default(),
            events_sink_port: 0,
            namespace: "default".to_string(),
            metrics_port,
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_every_loop() {
        let controller = Controller::new(config(Some(0)), MockObjectStore::new()).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(controller.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_start_is_not_an_error() {
        let controller = Controller::new(config(None), MockObjectStore::new()).await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        controller.run(shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_port_in_use_is_fatal() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let mut config = config(None);
        config.events_sink_port = port;

        let err = Controller::new(config, MockObjectStore::new()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Bind { .. }));
    }
}
