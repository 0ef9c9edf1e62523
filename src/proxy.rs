use crate::config::ProxyTarget;
use crate::error::{json_error_response, GatewayError, ProxyErrorCode};
use crate::pool::ConnectionPool;
use crate::probe::{ReadinessPolicy, ReadinessProbe};
use crate::setup::SetupSurface;
use crate::state::ConfigStore;
use crate::supervisor::{GatewayState, GatewaySupervisor};
use crate::token::BearerCredential;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Largest upgrade response head accepted from the gateway
const MAX_UPGRADE_RESPONSE: usize = 16 * 1024;

/// Everything a request handler needs; immutable after construction apart
/// from the supervisor's own state.
pub struct ProxyContext {
    pub config_store: ConfigStore,
    pub supervisor: Arc<GatewaySupervisor>,
    pub probe: Arc<ReadinessProbe>,
    pub readiness: ReadinessPolicy,
    pub pool: Arc<ConnectionPool>,
    pub credential: BearerCredential,
    pub target: ProxyTarget,
    pub setup: SetupSurface,
    /// Max wait for the gateway's response head
    pub request_timeout: Duration,
}

impl ProxyContext {
    /// Launch the gateway in the background unless one is already running.
    ///
    /// Concurrent callers race on the supervisor's single-flight guard; the
    /// losers see `AlreadyRunning` and do nothing.
    pub fn ensure_started(&self) {
        let supervisor = Arc::clone(&self.supervisor);
        let probe = Arc::clone(&self.probe);
        let policy = self.readiness.clone();

        tokio::spawn(async move {
            match supervisor.launch(&probe, &policy).await {
                Ok(ready) => {
                    info!(pid = ?ready.handle.pid(), endpoint = %ready.endpoint, "Gateway launched");
                }
                Err(GatewayError::AlreadyRunning { .. }) => {
                    debug!("Gateway launch already in progress");
                }
                Err(e) => {
                    // Already logged by the supervisor with the full message
                    debug!(error = %e, "Gateway launch failed");
                }
            }
        });
    }
}

/// Public listener: setup surface, deflection, and the authenticating proxy
pub struct ProxyServer {
    bind_addr: SocketAddr,
    ctx: Arc<ProxyContext>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(
        bind_addr: SocketAddr,
        ctx: Arc<ProxyContext>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            ctx,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, gateway = %self.ctx.target, "Proxy server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, ctx).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = Arc::clone(&ctx);
        async move { handle_request(req, ctx, addr).await }
    });

    // HTTP/1.1 connections can still use WebSocket upgrades
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    if ctx.setup.claims(req.uri().path()) {
        return Ok(ctx.setup.handle(req, &ctx).await);
    }

    if !ctx.config_store.is_configured().await {
        debug!(method = %req.method(), uri = %req.uri(), "Gateway not configured, deflecting to setup");
        return Ok(ctx.setup.redirect());
    }

    match ctx.supervisor.state() {
        GatewayState::Ready { .. } => {}
        GatewayState::Stopped => {
            ctx.ensure_started();
            return Ok(json_error_response(
                ProxyErrorCode::GatewayStarting,
                "Gateway is starting, please retry shortly",
            ));
        }
        GatewayState::Starting => {
            return Ok(json_error_response(
                ProxyErrorCode::GatewayStarting,
                "Gateway is starting, please retry shortly",
            ));
        }
        GatewayState::Exited { .. } | GatewayState::Failed => {
            return Ok(json_error_response(
                ProxyErrorCode::GatewayUnavailable,
                "Gateway is not running; restart the service to recover",
            ));
        }
    }

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    set_forwarding_headers(req.headers_mut(), &request_id, client_addr);

    debug!(method = %req.method(), uri = %req.uri(), request_id = %request_id, "Proxying request");

    if is_upgrade_request(&req) {
        return handle_upgrade(req, &ctx, request_id).await;
    }

    forward_request(req, &ctx, request_id).await
}

/// Overwrite the credential header with the authoritative token.
///
/// Whatever the client sent is discarded. Both the plain request path and the
/// upgrade path call this before anything is written to the gateway.
pub fn inject_credentials(headers: &mut HeaderMap, credential: &BearerCredential) {
    headers.insert(AUTHORIZATION, credential.header_value().clone());
}

/// Set the request ID and X-Forwarded-* headers.
///
/// The peer address is appended to any X-Forwarded-For chain set by an edge
/// proxy in front of us. Host and proto from upstream hops are kept.
fn set_forwarding_headers(headers: &mut HeaderMap, request_id: &str, client_addr: SocketAddr) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    let peer = client_addr.ip().to_string();
    let chain: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    let forwarded_for = if chain.is_empty() {
        peer
    } else {
        format!("{}, {}", chain.join(", "), peer)
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = headers.get(hyper::header::HOST).cloned() {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }
    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

async fn forward_request(
    mut req: Request<Incoming>,
    ctx: &ProxyContext,
    request_id: String,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    inject_credentials(req.headers_mut(), &ctx.credential);

    let result = tokio::time::timeout(ctx.request_timeout, ctx.pool.send_request(req, &ctx.target)).await;

    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            if e.is_connect() {
                warn!(gateway = %ctx.target, request_id = %request_id, error = %e, "Gateway refused connection");
            } else {
                error!(gateway = %ctx.target, request_id = %request_id, error = %e, "Failed to forward request");
            }
            Ok(json_error_response(
                ProxyErrorCode::ConnectionFailed,
                "Gateway unavailable",
            ))
        }
        Err(_) => {
            warn!(
                gateway = %ctx.target,
                request_id = %request_id,
                timeout_secs = ctx.request_timeout.as_secs(),
                "Request timed out"
            );
            Ok(json_error_response(
                ProxyErrorCode::RequestTimeout,
                format!(
                    "Request timed out after {} seconds",
                    ctx.request_timeout.as_secs()
                ),
            ))
        }
    }
}

/// Check if a request is a WebSocket/HTTP upgrade request
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    has_upgrade_connection && req.headers().contains_key(hyper::header::UPGRADE)
}

/// Build the raw HTTP/1.1 upgrade request sent to the gateway
pub fn build_upgrade_request<B>(req: &Request<B>, target: &ProxyTarget) -> Vec<u8> {
    let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut request = format!("{} {} HTTP/1.1\r\n", req.method(), path);

    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            request.push_str(&format!("{}: {}\r\n", name, v));
        }
    }

    if !req.headers().contains_key(hyper::header::HOST) {
        request.push_str(&format!("host: {}\r\n", target));
    }
    request.push_str("\r\n");

    request.into_bytes()
}

/// Parse the status line and headers of the gateway's upgrade response.
/// Returns `None` until the full head has arrived or if it is malformed.
fn parse_upgrade_response(data: &[u8]) -> Option<(StatusCode, Vec<(String, String)>, usize)> {
    let head_end = data.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = std::str::from_utf8(&data[..head_end]).ok()?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next()?;
    let code: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;
    let status = StatusCode::from_u16(code).ok()?;

    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Some((status, headers, head_end))
}

/// Read until the response head is complete
async fn read_upgrade_response(
    stream: &mut TcpStream,
) -> std::io::Result<(StatusCode, Vec<(String, String)>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "gateway closed connection before completing the upgrade response",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((status, headers, head_end)) = parse_upgrade_response(&buf) {
            // Bytes past the head already belong to the upgraded stream
            let leftover = buf.split_off(head_end);
            return Ok((status, headers, leftover));
        }
        if buf.len() > MAX_UPGRADE_RESPONSE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid or oversized upgrade response from gateway",
            ));
        }
    }
}

/// Collect the body of a refused upgrade so the client sees the gateway's
/// explanation. Only `Content-Length` bodies are read past what already
/// arrived with the head; chunked bodies are dropped.
async fn read_rejection_body<R>(
    stream: &mut R,
    headers: &[(String, String)],
    mut body: Vec<u8>,
) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    };

    if header("transfer-encoding").is_some_and(|v| v.to_ascii_lowercase().contains("chunked")) {
        return Ok(Vec::new());
    }

    let Some(length) = header("content-length").and_then(|v| v.parse::<usize>().ok()) else {
        return Ok(body);
    };
    let length = length.min(MAX_UPGRADE_RESPONSE);

    let mut chunk = [0u8; 4096];
    while body.len() < length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);

    Ok(body)
}

async fn handle_upgrade(
    mut req: Request<Incoming>,
    ctx: &ProxyContext,
    request_id: String,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    inject_credentials(req.headers_mut(), &ctx.credential);

    let upgrade_type = req
        .headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    debug!(request_id = %request_id, upgrade_type = %upgrade_type, "Handling upgrade request");

    let raw_request = build_upgrade_request(&req, &ctx.target);

    let mut backend_stream = match TcpStream::connect(ctx.target.addr()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(gateway = %ctx.target, request_id = %request_id, error = %e, "Failed to connect to gateway for upgrade");
            return Ok(json_error_response(
                ProxyErrorCode::ConnectionFailed,
                "Gateway unavailable",
            ));
        }
    };

    if let Err(e) = backend_stream.write_all(&raw_request).await {
        error!(request_id = %request_id, error = %e, "Failed to send upgrade request to gateway");
        return Ok(json_error_response(
            ProxyErrorCode::ConnectionFailed,
            "Gateway unavailable",
        ));
    }

    let (status, response_headers, leftover) = match tokio::time::timeout(
        ctx.request_timeout,
        read_upgrade_response(&mut backend_stream),
    )
    .await
    {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            error!(request_id = %request_id, error = %e, "Failed to read upgrade response from gateway");
            return Ok(json_error_response(
                ProxyErrorCode::ConnectionFailed,
                "Gateway unavailable",
            ));
        }
        Err(_) => {
            warn!(request_id = %request_id, "Timed out waiting for gateway upgrade response");
            return Ok(json_error_response(
                ProxyErrorCode::RequestTimeout,
                "Gateway did not answer the upgrade request",
            ));
        }
    };

    if status != StatusCode::SWITCHING_PROTOCOLS {
        warn!(request_id = %request_id, status = %status, "Gateway rejected upgrade request");
        let body = match tokio::time::timeout(
            ctx.request_timeout,
            read_rejection_body(&mut backend_stream, &response_headers, leftover),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                debug!(request_id = %request_id, error = %e, "Failed to read upgrade rejection body");
                Vec::new()
            }
            Err(_) => {
                debug!(request_id = %request_id, "Timed out reading upgrade rejection body");
                Vec::new()
            }
        };
        let mut response = Response::builder().status(status);
        for (name, value) in &response_headers {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            if let Ok(hv) = HeaderValue::from_str(value) {
                response = response.header(name.as_str(), hv);
            }
        }
        return Ok(response
            .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
            .expect("valid response builder"));
    }

    info!(request_id = %request_id, upgrade_type = %upgrade_type, "Upgrade accepted by gateway");

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        if let Ok(hv) = HeaderValue::from_str(value) {
            response = response.header(name.as_str(), hv);
        }
    }
    let response = response
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder");

    // Runs until either side closes; no internal timer
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                forward_bidirectional(upgraded, backend_stream, leftover, &request_id).await;
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Failed to upgrade client connection");
            }
        }
    });

    Ok(response)
}

/// Shuttle bytes between client and gateway until either side closes
async fn forward_bidirectional(
    client: Upgraded,
    mut backend: TcpStream,
    leftover: Vec<u8>,
    request_id: &str,
) {
    let mut client_io = TokioIo::new(client);

    if !leftover.is_empty() {
        if let Err(e) = client_io.write_all(&leftover).await {
            debug!(request_id = %request_id, error = %e, "Client closed before buffered gateway bytes were delivered");
            return;
        }
    }

    match tokio::io::copy_bidirectional(&mut client_io, &mut backend).await {
        Ok((client_to_gateway, gateway_to_client)) => {
            debug!(
                request_id = %request_id,
                client_to_gateway,
                gateway_to_client,
                "Upgraded connection closed"
            );
        }
        Err(e) => {
            debug!(request_id = %request_id, error = %e, "Upgraded connection closed with error");
        }
    }
}
