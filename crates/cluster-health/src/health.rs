//! Cluster health monitor
//!
//! One attempt opens the health-check stream on the first control-plane node
//! and reads progress messages until the stream ends. Early after bootstrap
//! the check routinely fails while cluster components settle, so every
//! attempt error is retried at a fixed interval until the overall budget is
//! spent.

use crate::client::HealthClient;
use crate::cluster::ClusterDescriptor;
use crate::error::HealthError;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// How long each health call lets the node wait for the cluster.
pub const HEALTH_WAIT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Fixed-interval retry over a total time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time allowed, attempts included
    pub budget: Duration,
    /// Pause between a failed attempt and the next one
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(5 * 60),
            interval: Duration::from_secs(10),
        }
    }
}

impl<C: HealthClient> ClusterDescriptor<C> {
    /// Wait for the cluster to report healthy under the default policy.
    pub async fn health(&self) -> Result<(), HealthError> {
        self.health_with(RetryPolicy::default()).await
    }

    /// Wait for the cluster to report healthy, retrying every failure until
    /// `policy.budget` is spent.
    ///
    /// # Errors
    ///
    /// [`HealthError::Timeout`] carrying the last attempt's error.
    pub async fn health_with(&self, policy: RetryPolicy) -> Result<(), HealthError> {
        let deadline = Instant::now() + policy.budget;
        let mut attempt: u32 = 1;

        loop {
            let error = match tokio::time::timeout_at(deadline, self.health_attempt()).await {
                Ok(Ok(())) => {
                    info!(cluster = %self.name(), attempt, "Cluster is healthy");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => HealthError::AttemptDeadline,
            };

            let next = Instant::now() + policy.interval;
            if next >= deadline {
                return Err(HealthError::Timeout {
                    budget: policy.budget,
                    last: Box::new(error),
                });
            }

            warn!(
                cluster = %self.name(),
                attempt,
                error = %error,
                "Health check failed, retrying in {:?}",
                policy.interval
            );
            tokio::time::sleep_until(next).await;
            attempt += 1;
        }
    }

    /// Run a single health check to completion.
    pub async fn health_attempt(&self) -> Result<(), HealthError> {
        let info = self.cluster_info();
        let node = &self.control_plane_nodes()[0];

        // Only a stream that was already running may end in Canceled
        let mut stream = self
            .client()
            .cluster_health_check(node, HEALTH_WAIT_TIMEOUT, &info)
            .await?;

        while let Some(item) = stream.next().await {
            let progress = match item {
                Ok(progress) => progress,
                Err(e) if e.is_cancellation() => return Ok(()),
                Err(e) => return Err(e),
            };

            if !progress.error.is_empty() {
                return Err(HealthError::Check(progress.error));
            }

            info!(cluster = %self.name(), "{}", progress.message);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClusterInfo, HealthProgress, HealthStream};
    use crate::error::RpcCode;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted attempt outcomes, consumed one per call.
    enum Script {
        Fail(RpcCode),
        Stream(Vec<Result<HealthProgress, HealthError>>),
        Hang,
    }

    struct ScriptedClient {
        script: Mutex<VecDeque<Script>>,
        fallback: fn() -> Script,
        calls: Mutex<Vec<(String, Duration, ClusterInfo)>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Script>, fallback: fn() -> Script) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HealthClient for ScriptedClient {
        async fn cluster_health_check(
            &self,
            node: &str,
            wait_timeout: Duration,
            info: &ClusterInfo,
        ) -> Result<HealthStream, HealthError> {
            self.calls
                .lock()
                .unwrap()
                .push((node.to_string(), wait_timeout, info.clone()));
            let next = self.script.lock().unwrap().pop_front().unwrap_or_else(self.fallback);
            match next {
                Script::Fail(code) => Err(HealthError::Rpc {
                    code,
                    message: "connection refused".to_string(),
                }),
                Script::Stream(items) => Ok(Box::pin(futures::stream::iter(items))),
                Script::Hang => Ok(Box::pin(futures::stream::pending())),
            }
        }
    }

    fn progress(message: &str, error: &str) -> Result<HealthProgress, HealthError> {
        Ok(HealthProgress {
            message: message.to_string(),
            error: error.to_string(),
        })
    }

    fn healthy() -> Script {
        Script::Stream(vec![progress("waiting for etcd", ""), progress("all nodes ready", "")])
    }

    fn unavailable() -> Script {
        Script::Fail(RpcCode::Unavailable)
    }

    fn cluster(client: ScriptedClient) -> ClusterDescriptor<ScriptedClient> {
        ClusterDescriptor::new(
            "management",
            "172.24.0.1".parse().unwrap(),
            vec!["172.24.0.2".to_string(), "172.24.0.5".to_string()],
            vec!["172.24.0.3".to_string()],
            client,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_attempt_targets_first_control_plane_node() {
        let cluster = cluster(ScriptedClient::new(vec![healthy()], healthy));

        cluster.health_attempt().await.unwrap();

        let calls = cluster.client().calls.lock().unwrap();
        let (node, wait, info) = &calls[0];
        assert_eq!(node, "172.24.0.2");
        assert_eq!(*wait, HEALTH_WAIT_TIMEOUT);
        assert_eq!(info.control_plane_nodes.len(), 2);
        assert_eq!(info.worker_nodes, vec!["172.24.0.3".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_stream_counts_as_success() {
        let cancelled = Script::Stream(vec![
            progress("waiting for etcd", ""),
            Err(HealthError::Rpc {
                code: RpcCode::Canceled,
                message: "context canceled".to_string(),
            }),
        ]);
        let cluster = cluster(ScriptedClient::new(vec![cancelled], unavailable));

        cluster.health_attempt().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_open_fails_attempt() {
        let cluster = cluster(ScriptedClient::new(vec![Script::Fail(RpcCode::Canceled)], healthy));

        let err = cluster.health_attempt().await.unwrap_err();
        assert!(matches!(err, HealthError::Rpc { code: RpcCode::Canceled, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_open_is_retried() {
        let cluster = cluster(ScriptedClient::new(vec![Script::Fail(RpcCode::Canceled)], healthy));
        let start = Instant::now();

        cluster.health().await.unwrap();

        assert_eq!(cluster.client().call_count(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_error_metadata_fails_attempt() {
        let failing = Script::Stream(vec![
            progress("waiting for etcd", ""),
            progress("", "etcd members are not healthy"),
            progress("all nodes ready", ""),
        ]);
        let cluster = cluster(ScriptedClient::new(vec![failing], healthy));

        let err = cluster.health_attempt().await.unwrap_err();
        assert_eq!(err.to_string(), "healthcheck error: etcd members are not healthy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_healthy() {
        let script = vec![
            unavailable(),
            Script::Stream(vec![progress("", "kubelet not ready")]),
            unavailable(),
        ];
        let cluster = cluster(ScriptedClient::new(script, healthy));
        let start = Instant::now();

        cluster.health().await.unwrap();

        assert_eq!(cluster.client().call_count(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_failure_times_out_within_budget() {
        let cluster = cluster(ScriptedClient::new(vec![], unavailable));
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let err = cluster.health_with(policy).await.unwrap_err();

        assert!(start.elapsed() <= policy.budget + policy.interval);
        match err {
            HealthError::Timeout { budget, last } => {
                assert_eq!(budget, policy.budget);
                assert!(matches!(*last, HealthError::Rpc { code: RpcCode::Unavailable, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.client().call_count(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_is_cut_at_budget() {
        let cluster = cluster(ScriptedClient::new(vec![], || Script::Hang));
        let policy = RetryPolicy {
            budget: Duration::from_secs(60),
            interval: Duration::from_secs(10),
        };
        let start = Instant::now();

        let err = cluster.health_with(policy).await.unwrap_err();

        assert_eq!(start.elapsed(), policy.budget);
        assert!(matches!(err, HealthError::Timeout { last, .. } if matches!(*last, HealthError::AttemptDeadline)));
        assert_eq!(cluster.client().call_count(), 1);
    }
}
