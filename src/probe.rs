//! Readiness probing for the gateway
//!
//! Gateway builds expose health under different routes, so the probe walks a
//! priority-ordered list of candidate paths each round and stops at the first
//! one that answers with a 2xx.

use crate::config::{Config, ProxyTarget};
use crate::error::GatewayError;
use crate::pool::ConnectionPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Timing of individual probe rounds
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Delay between rounds
    pub interval: Duration,
    /// Timeout for a single health request
    pub request_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(1),
        }
    }
}

/// What to probe and for how long
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Candidate health paths, highest priority first
    pub candidates: Vec<String>,
    /// Overall deadline for the gateway to answer
    pub timeout: Duration,
}

impl ReadinessPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            candidates: config.gateway.health_paths.clone(),
            timeout: config.gateway.startup_timeout(),
        }
    }
}

/// Polls candidate health endpoints on the gateway target
pub struct ReadinessProbe {
    pool: Arc<ConnectionPool>,
    target: ProxyTarget,
    config: ProbeConfig,
}

impl ReadinessProbe {
    pub fn new(pool: Arc<ConnectionPool>, target: ProxyTarget, config: ProbeConfig) -> Self {
        Self {
            pool,
            target,
            config,
        }
    }

    /// Wait until one of `candidates` answers successfully, returning that path.
    ///
    /// Candidates are tried in order within each round and the first success
    /// ends the wait immediately. The polling future is dropped on return, so
    /// nothing keeps running after success or timeout.
    pub async fn wait_ready(
        &self,
        candidates: &[String],
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let start = Instant::now();
        debug!(
            gateway = %self.target,
            ?candidates,
            timeout_ms = timeout.as_millis(),
            "Waiting for gateway readiness"
        );

        let polling = async {
            loop {
                for path in candidates {
                    if self
                        .pool
                        .check_backend(&self.target, path, self.config.request_timeout)
                        .await
                    {
                        return path.clone();
                    }
                }
                tokio::time::sleep(self.config.interval).await;
            }
        };

        match tokio::time::timeout(timeout, polling).await {
            Ok(endpoint) => {
                info!(
                    gateway = %self.target,
                    endpoint = %endpoint,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Gateway is ready"
                );
                Ok(endpoint)
            }
            Err(_) => Err(GatewayError::ReadinessTimeout {
                target: self.target.to_string(),
                attempted: candidates.to_vec(),
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    /// Wait using the paths and deadline of `policy`
    pub async fn wait_ready_with(&self, policy: &ReadinessPolicy) -> Result<String, GatewayError> {
        self.wait_ready(&policy.candidates, policy.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_policy_from_config() {
        let config = Config::default();
        let policy = ReadinessPolicy::from_config(&config);
        assert_eq!(policy.candidates, vec!["/health", "/", "/openclaw"]);
        assert_eq!(policy.timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_answers() {
        let probe = ReadinessProbe::new(
            Arc::new(ConnectionPool::new(PoolConfig::default())),
            ProxyTarget::loopback(closed_port()),
            ProbeConfig {
                interval: Duration::from_millis(50),
                request_timeout: Duration::from_millis(100),
            },
        );
        let candidates = vec!["/health".to_string(), "/".to_string()];

        let start = Instant::now();
        let result = probe.wait_ready(&candidates, Duration::from_millis(400)).await;
        let elapsed = start.elapsed();

        match result {
            Err(GatewayError::ReadinessTimeout {
                attempted,
                timeout_ms,
                ..
            }) => {
                assert_eq!(attempted, candidates);
                assert_eq!(timeout_ms, 400);
            }
            other => panic!("expected readiness timeout, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }
}
