use std::sync::Arc;

use async_trait::async_trait;
use botgate_admin::SharedState;
use botgate_bot_detect::identity::resolve_client_ip;
use botgate_common::RequestMeta;
use botgate_limiter::{Gate, GateResponse, Verdict, ENDPOINT_PREFIX};
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, SET_COOKIE, VARY};
use http::{Method, StatusCode};
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use tracing::{debug, info, warn};

use crate::context::{Outcome, RequestContext};
use crate::upstream::UpstreamSelector;

/// Largest form body accepted by the verify endpoint.
const MAX_FORM_BODY: usize = 16 * 1024;

pub struct BotgateProxy {
    pub state: SharedState,
    pub upstream: UpstreamSelector,
}

impl BotgateProxy {
    pub fn new(state: SharedState) -> Self {
        let upstream = UpstreamSelector::from_config(&state.config.upstream);
        info!(
            upstream = %upstream.name,
            servers = upstream.server_count(),
            limiter = state.gate.is_some(),
            "proxy service created"
        );
        Self { state, upstream }
    }

    fn gate(&self) -> Option<Arc<Gate>> {
        self.state.gate.clone()
    }
}

fn request_meta(session: &Session) -> RequestMeta {
    let header = session.req_header();
    let remote_addr = session.client_addr().map(|addr| addr.to_string());
    let tls = session
        .digest()
        .is_some_and(|digest| digest.ssl_digest.is_some());
    RequestMeta::new(
        header.method.clone(),
        header.uri.clone(),
        header.headers.clone(),
        remote_addr,
    )
    .with_tls(tls)
}

async fn read_form_body(session: &mut Session) -> Result<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = session.read_request_body().await? {
        if body.len() + chunk.len() > MAX_FORM_BODY {
            return Error::e_explain(ErrorType::HTTPStatus(413), "form body too large");
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

async fn write_gate_response(session: &mut Session, resp: &GateResponse) -> Result<()> {
    let mut header = ResponseHeader::build(resp.status, Some(resp.headers.len() + 1))?;
    for (name, value) in resp.headers.iter() {
        header.append_header(name.clone(), value.clone())?;
    }
    header.insert_header(CONTENT_LENGTH, resp.body.len())?;

    let head_only = session.req_header().method == Method::HEAD || resp.body.is_empty();
    session
        .write_response_header(Box::new(header), head_only)
        .await?;
    if !head_only {
        session
            .write_response_body(Some(resp.body.clone()), true)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ProxyHttp for BotgateProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let metrics = &self.state.metrics;
        metrics.requests_total.inc();

        let meta = request_meta(session);
        ctx.method = meta.method.to_string();
        ctx.uri = meta.request_uri().to_string();
        ctx.client_ip = resolve_client_ip(&meta).unwrap_or_default();

        let Some(gate) = self.gate() else {
            return Ok(false);
        };

        if meta.path().starts_with(ENDPOINT_PREFIX) {
            let body = if meta.method == Method::POST {
                read_form_body(session).await?
            } else {
                Bytes::new()
            };
            if let Some(resp) = gate.serve_endpoint(&meta, &body).await {
                if resp.headers.contains_key(SET_COOKIE) {
                    metrics.challenges_solved.inc();
                }
                ctx.outcome = Outcome::Endpoint;
                ctx.response_status = resp.status.as_u16();
                write_gate_response(session, &resp).await?;
                return Ok(true);
            }
        }

        let resp = match gate.evaluate(&meta) {
            Verdict::Allow { headers } => {
                ctx.gate_headers = headers;
                return Ok(false);
            }
            Verdict::Challenge(resp) => {
                metrics.challenges_issued.inc();
                ctx.outcome = Outcome::Challenged;
                resp
            }
            Verdict::Block(resp) => {
                metrics.requests_blocked.inc();
                if resp.status == StatusCode::TOO_MANY_REQUESTS {
                    metrics.requests_rate_limited.inc();
                    ctx.outcome = Outcome::RateLimited;
                } else {
                    ctx.outcome = Outcome::Blocked;
                }
                resp
            }
        };

        ctx.response_status = resp.status.as_u16();
        write_gate_response(session, &resp).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let addr = self
            .upstream
            .select()
            .ok_or_else(|| Error::new(ErrorType::ConnectProxyFailure))?;

        debug!(upstream = %self.upstream.name, addr, "selected upstream peer");

        let peer = HttpPeer::new(addr, false, String::new());
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if !ctx.client_ip.is_empty() {
            upstream_request.insert_header("x-real-ip", &ctx.client_ip)?;
        }
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        ctx.response_status = upstream_response.status.as_u16();

        for (name, value) in ctx.gate_headers.iter() {
            if name == VARY {
                upstream_response.append_header(name.clone(), value.clone())?;
            } else {
                upstream_response.insert_header(name.clone(), value.clone())?;
            }
        }

        Ok(())
    }

    async fn logging(&self, _session: &mut Session, error: Option<&pingora_core::Error>, ctx: &mut Self::CTX) {
        let duration = ctx.request_start.elapsed();
        self.state
            .metrics
            .request_duration
            .with_label_values(&[ctx.outcome.as_str()])
            .observe(duration.as_secs_f64());

        if let Some(e) = error {
            warn!(
                client_ip = %ctx.client_ip,
                method = %ctx.method,
                uri = %ctx.uri,
                error = %e,
                "request failed"
            );
            return;
        }

        info!(
            client_ip = %ctx.client_ip,
            method = %ctx.method,
            uri = %ctx.uri,
            status = ctx.response_status,
            duration_ms = duration.as_millis() as u64,
            outcome = ctx.outcome.as_str(),
            "request completed"
        );
    }
}
