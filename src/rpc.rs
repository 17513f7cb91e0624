//! RPC Front-End (spec.md §4.E): the Envoy `RateLimitService.ShouldRateLimit`
//! gRPC surface, plus the trace-id propagating interceptor.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info_span;
use tracing::Instrument;

use crate::engine::{Code, Descriptor, RateLimitRequest};
use crate::error::RateLimitError;
use crate::proto;
use crate::service::RateLimitService as Service;
use crate::utils::Unit;

/// Tracing identifiers lifted out of inbound gRPC metadata by
/// [`trace_interceptor`] and threaded through request-scoped logging
/// (spec.md §4.E, §6).
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    pub request_id: Option<String>,
    pub b3_trace_id: Option<String>,
    pub b3_span_id: Option<String>,
}

/// Reads `x-request-id`, `x-b3-traceid`, `x-b3-spanid` from inbound
/// metadata and stashes them on the request's extensions for the handler
/// to pick back up.
pub fn trace_interceptor(mut req: Request<()>) -> Result<Request<()>, Status> {
    let ctx = TraceContext {
        request_id: metadata_str(&req, "x-request-id"),
        b3_trace_id: metadata_str(&req, "x-b3-traceid"),
        b3_span_id: metadata_str(&req, "x-b3-spanid"),
    };
    req.extensions_mut().insert(ctx);
    Ok(req)
}

fn metadata_str(req: &Request<()>, key: &str) -> Option<String> {
    req.metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Adapts the internal [`Service`] to the generated `RateLimitService`
/// trait. The gRPC call itself always succeeds (§7): per-descriptor
/// failures are folded into the response, not surfaced as `tonic::Status`.
pub struct RateLimitServiceImpl {
    pub service: Arc<Service>,
}

#[tonic::async_trait]
impl proto::RateLimitService for RateLimitServiceImpl {
    async fn should_rate_limit(
        &self,
        request: Request<proto::RateLimitRequest>,
    ) -> Result<Response<proto::RateLimitResponse>, Status> {
        let trace = request
            .extensions()
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_default();

        let span = info_span!(
            "should_rate_limit",
            request_id = trace.request_id.as_deref().unwrap_or(""),
            b3_trace_id = trace.b3_trace_id.as_deref().unwrap_or(""),
            b3_span_id = trace.b3_span_id.as_deref().unwrap_or(""),
        );

        async move {
            let req = to_internal_request(request.into_inner());
            match self.service.should_rate_limit(req).await {
                Ok(response) => Ok(Response::new(to_proto_response(response))),
                Err(e) => Err(to_status(e)),
            }
        }
        .instrument(span)
        .await
    }
}

fn to_internal_request(req: proto::RateLimitRequest) -> RateLimitRequest {
    RateLimitRequest {
        domain: req.domain,
        descriptors: req
            .descriptors
            .into_iter()
            .map(|d| Descriptor {
                entries: d.entries.into_iter().map(|e| (e.key, e.value)).collect(),
            })
            .collect(),
        hits_addend: req.hits_addend,
    }
}

fn to_proto_response(response: crate::engine::RateLimitResponse) -> proto::RateLimitResponse {
    proto::RateLimitResponse {
        overall_code: to_proto_code(response.overall_code) as i32,
        statuses: response
            .statuses
            .into_iter()
            .map(|status| proto::DescriptorStatus {
                code: to_proto_code(status.code) as i32,
                current_limit: status.current_limit.map(|limit| proto::RateLimit {
                    name: String::new(),
                    requests_per_unit: limit.requests_per_unit,
                    unit: to_proto_unit(limit.unit) as i32,
                }),
                limit_remaining: status.limit_remaining,
            })
            .collect(),
    }
}

fn to_proto_code(code: Code) -> proto::ResponseCode {
    match code {
        Code::Ok => proto::ResponseCode::Ok,
        Code::OverLimit => proto::ResponseCode::OverLimit,
    }
}

fn to_proto_unit(unit: Unit) -> proto::generated::rate_limit_response::rate_limit::Unit {
    use proto::generated::rate_limit_response::rate_limit::Unit as ProtoUnit;
    match unit {
        Unit::Second => ProtoUnit::Second,
        Unit::Minute => ProtoUnit::Minute,
        Unit::Hour => ProtoUnit::Hour,
        Unit::Day => ProtoUnit::Day,
    }
}

fn to_status(e: RateLimitError) -> Status {
    match e {
        RateLimitError::Service(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}
