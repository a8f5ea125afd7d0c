//! Proxy engine.
//!
//! # Data Flow
//! ```text
//! RequestContext + Upstream + Transport
//!     → director (rewrite, strip hop-by-hop, sign)
//!     → transport round trip
//!     → Server header, hop-by-hop removal
//!     → stream.rs (pooled copy, periodic flush)        for ordinary responses
//!     → tunnel over both upgraded connections           for 101 responses
//! ```
//!
//! # Design Decisions
//! - One engine serves exactly one exchange and is consumed by it
//! - Dispatch failures are classified into a status and a status-text body
//! - A caller that disappears mid-dispatch is recorded as 499 by a drop guard

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, Method, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::http::hop_by_hop::{response_upgrade_type, strip_response_headers, upgrade_type};
use crate::http::response::{error_response, flushes_immediately, set_server_header};
use crate::observability::metrics;
use crate::proxy::buffer_pool::{BufferPool, PooledBuffer};
use crate::proxy::classify::{classify, ErrorClass};
use crate::proxy::director::Director;
use crate::proxy::stream::{forward_body, CopyOutcome, FlushPolicy};
use crate::upstream::{Transport, UpgradeIo, UpgradedStream, Upstream, UpstreamBody};

/// Settings shared by every engine.
#[derive(Clone)]
pub struct EngineOptions {
    pub product: HeaderValue,
    pub flush_interval: Duration,
    pub pool: BufferPool,
}

/// Serves one exchange against one upstream.
pub struct ProxyEngine {
    ctx: RequestContext,
    upstream: Upstream,
    transport: Arc<dyn Transport>,
    director: Director,
    options: Arc<EngineOptions>,
}

/// Records a caller disconnect if dropped before the upstream answered.
struct DispatchGuard<'a> {
    request_id: &'a str,
    service: &'a str,
    method: Method,
    start: Instant,
    armed: bool,
}

impl DispatchGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let status = ErrorClass::Canceled.status();
            metrics::record_upstream_error(ErrorClass::Canceled.as_str());
            metrics::record_request(self.method.as_str(), status.as_u16(), self.service, self.start);
            tracing::debug!(
                request_id = %self.request_id,
                service = %self.service,
                status = status.as_u16(),
                "Caller disconnected before upstream responded"
            );
        }
    }
}

impl ProxyEngine {
    pub fn new(
        ctx: RequestContext,
        upstream: Upstream,
        transport: Arc<dyn Transport>,
        director: Director,
        options: Arc<EngineOptions>,
    ) -> Self {
        Self {
            ctx,
            upstream,
            transport,
            director,
            options,
        }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Forward the request and build the caller's response. `client_upgrade`
    /// is the caller connection's upgrade handle, needed only for 101 replies.
    pub async fn serve(self, client_upgrade: Option<OnUpgrade>) -> Response<Body> {
        let out = match self.director.direct(&self.ctx, &self.upstream).await {
            Ok(out) => out,
            Err(e) => return ProxyError::from(e).into_response(),
        };
        let requested_upgrade = upgrade_type(&out.headers);

        tracing::debug!(
            request_id = %self.ctx.request_id,
            upstream = %self.upstream.url,
            dial = %out.authority,
            version = ?out.version,
            "Dispatching request"
        );

        let mut guard = DispatchGuard {
            request_id: &self.ctx.request_id,
            service: &self.ctx.service.name,
            method: out.method.clone(),
            start: Instant::now(),
            armed: true,
        };
        let result = self.transport.round_trip(out).await;
        guard.disarm();
        drop(guard);

        let mut response = match result {
            Ok(response) => response,
            Err(e) => return self.dispatch_failed(e.as_ref()),
        };

        set_server_header(response.headers_mut(), &self.options.product);

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            return self.bridge_upgrade(response, requested_upgrade, client_upgrade);
        }

        strip_response_headers(response.headers_mut());
        let policy = if flushes_immediately(response.headers()) {
            FlushPolicy::Immediate
        } else {
            FlushPolicy::Interval(self.options.flush_interval)
        };

        let (parts, body) = response.into_parts();
        let pool = self.options.pool.clone();
        let request_id = self.ctx.request_id.clone();
        let service = self.ctx.service.name.clone();
        let body = forward_body(body, pool.clone(), policy, move |outcome| {
            log_copy_outcome(&request_id, &service, outcome);
            metrics::record_buffer_pool_idle(pool.idle());
        });
        Response::from_parts(parts, body)
    }

    fn dispatch_failed(&self, err: &(dyn StdError + 'static)) -> Response<Body> {
        let class = classify(err);
        let status = class.status();
        metrics::record_upstream_error(class.as_str());
        tracing::warn!(
            request_id = %self.ctx.request_id,
            service = %self.ctx.service.name,
            upstream = %self.upstream.url,
            class = %class,
            status = status.as_u16(),
            error = %err,
            "Upstream dispatch failed"
        );
        error_response(status)
    }

    fn bridge_upgrade(
        &self,
        mut response: Response<UpstreamBody>,
        requested: Option<String>,
        client_upgrade: Option<OnUpgrade>,
    ) -> Response<Body> {
        let offered = response_upgrade_type(response.headers());
        let matches = match (&requested, &offered) {
            (Some(requested), Some(offered)) => requested.eq_ignore_ascii_case(offered),
            _ => false,
        };
        if !matches {
            tracing::warn!(
                request_id = %self.ctx.request_id,
                requested = ?requested,
                offered = ?offered,
                "Upstream switched to a protocol that was not requested"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let Some(client_upgrade) = client_upgrade else {
            tracing::warn!(
                request_id = %self.ctx.request_id,
                "Caller connection cannot be upgraded"
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let upstream_upgrade = match response.extensions_mut().remove::<UpgradedStream>().and_then(|s| s.take()) {
            Some(io) => UpstreamUpgrade::Switched(io),
            None => UpstreamUpgrade::Pending(hyper::upgrade::on(&mut response)),
        };
        let pool = self.options.pool.clone();
        let request_id = self.ctx.request_id.clone();
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade.connection()) {
                Ok((client, upstream)) => {
                    let result = tunnel(TokioIo::new(client), upstream, &pool).await;
                    tracing::debug!(request_id = %request_id, result = ?result, "Upgraded connection closed");
                }
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Connection upgrade failed");
                }
            }
        });

        let (parts, _) = response.into_parts();
        Response::from_parts(parts, Body::empty())
    }
}

/// The upstream side of a switched connection.
enum UpstreamUpgrade {
    /// Already switched by the handshake transport.
    Switched(Box<dyn UpgradeIo>),
    /// Pending on a hyper connection.
    Pending(OnUpgrade),
}

impl UpstreamUpgrade {
    async fn connection(self) -> Result<Box<dyn UpgradeIo>, hyper::Error> {
        match self {
            UpstreamUpgrade::Switched(io) => Ok(io),
            UpstreamUpgrade::Pending(on) => Ok(Box::new(TokioIo::new(on.await?))),
        }
    }
}

fn log_copy_outcome(request_id: &str, service: &str, outcome: CopyOutcome) {
    match outcome {
        CopyOutcome::Complete { bytes } => {
            tracing::debug!(request_id = %request_id, service = %service, bytes, "Response streamed");
        }
        CopyOutcome::Canceled { bytes } => {
            metrics::record_upstream_error(ErrorClass::Canceled.as_str());
            tracing::debug!(
                request_id = %request_id,
                service = %service,
                bytes,
                status = ErrorClass::Canceled.status().as_u16(),
                "Caller disconnected while streaming"
            );
        }
        CopyOutcome::Failed { bytes, class } => {
            metrics::record_upstream_error(class.as_str());
            tracing::warn!(
                request_id = %request_id,
                service = %service,
                bytes,
                class = %class,
                "Upstream body failed mid-stream"
            );
        }
    }
}

/// Copy both ways until either side closes. Returns bytes sent by the side that finished.
async fn tunnel<A, B>(client: A, upstream: B, pool: &BufferPool) -> io::Result<u64>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let mut to_upstream = pool.get();
    let mut to_client = pool.get();

    tokio::select! {
        sent = pump(&mut client_read, &mut upstream_write, &mut to_upstream) => sent,
        sent = pump(&mut upstream_read, &mut client_write, &mut to_client) => sent,
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, buf: &mut PooledBuffer) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        buf.clear();
        let n = reader.read_buf(&mut **buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}
