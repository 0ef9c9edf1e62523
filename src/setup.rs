//! Setup surface routing
//!
//! Requests under the setup prefix never reach the gateway and never carry the
//! gateway token. A couple of read-only endpoints are answered here; the rest
//! goes to the onboarding service when one is attached.

use crate::config::ProxyTarget;
use crate::error::{json_error_response, ProxyErrorCode};
use crate::proxy::ProxyContext;
use crate::state::ConfigurationState;
use crate::supervisor::GatewayState;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error};

/// Claims the setup prefix and deflects unconfigured traffic to it
#[derive(Debug, Clone)]
pub struct SetupSurface {
    prefix: String,
    upstream: Option<ProxyTarget>,
}

#[derive(Debug, Serialize)]
struct SetupStatus {
    configured: bool,
    configuration: ConfigurationState,
    gateway: GatewayState,
    target: String,
    pool: PoolCounters,
}

#[derive(Debug, Serialize)]
struct PoolCounters {
    requests: u64,
    health_checks: u64,
}

impl SetupSurface {
    pub fn new(prefix: impl Into<String>, upstream: Option<ProxyTarget>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { prefix, upstream }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True for the prefix itself and anything below it
    pub fn claims(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Response sent instead of proxying while unconfigured
    pub fn redirect(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        Response::builder()
            .status(StatusCode::FOUND)
            .header(hyper::header::LOCATION, self.prefix.as_str())
            .header(hyper::header::CONTENT_TYPE, "text/plain")
            .body(
                Full::new(Bytes::from("Gateway is not configured; redirecting to setup"))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .expect("valid response builder")
    }

    /// Handle a request already known to be claimed by this surface
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        ctx: &ProxyContext,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        let rest = req
            .uri()
            .path()
            .strip_prefix(self.prefix.as_str())
            .unwrap_or("")
            .to_string();

        match (req.method(), rest.as_str()) {
            (&Method::GET, "/healthz") => json_ok(r#"{"ok":true}"#.to_string()),
            (&Method::GET, "/api/status") => {
                let configuration = ctx.config_store.state().await;
                let stats = ctx.pool.stats();
                let status = SetupStatus {
                    configured: configuration == ConfigurationState::Configured,
                    configuration,
                    gateway: ctx.supervisor.state(),
                    target: ctx.target.to_string(),
                    pool: PoolCounters {
                        requests: stats.get_total_requests(),
                        health_checks: stats.get_health_checks(),
                    },
                };
                match serde_json::to_string(&status) {
                    Ok(body) => json_ok(body),
                    Err(e) => {
                        error!(error = %e, "Failed to serialize setup status");
                        json_error_response(ProxyErrorCode::InternalError, "Failed to render status")
                    }
                }
            }
            _ => match self.upstream {
                Some(upstream) => {
                    debug!(path = %req.uri().path(), %upstream, "Forwarding to onboarding service");
                    match ctx.pool.send_request(req, &upstream).await {
                        Ok(response) => response,
                        Err(e) => {
                            error!(%upstream, error = %e, "Onboarding service unavailable");
                            json_error_response(
                                ProxyErrorCode::ConnectionFailed,
                                "Onboarding service unavailable",
                            )
                        }
                    }
                }
                None => json_error_response(
                    ProxyErrorCode::SetupUnavailable,
                    "No onboarding service is attached to this gateway",
                ),
            },
        }
    }
}

fn json_ok(body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_prefix_and_children_only() {
        let setup = SetupSurface::new("/setup", None);

        assert!(setup.claims("/setup"));
        assert!(setup.claims("/setup/"));
        assert!(setup.claims("/setup/api/status"));
        assert!(!setup.claims("/setupx"));
        assert!(!setup.claims("/"));
        assert!(!setup.claims("/api/setup"));
    }

    #[test]
    fn test_trailing_slash_in_prefix_is_normalized() {
        let setup = SetupSurface::new("/onboard/", None);
        assert_eq!(setup.prefix(), "/onboard");
        assert!(setup.claims("/onboard/healthz"));
    }

    #[test]
    fn test_redirect_points_at_prefix() {
        let response = SetupSurface::new("/setup", None).redirect();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("location").unwrap(), "/setup");
    }
}
