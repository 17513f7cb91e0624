//! Generated protobuf types and gRPC service definitions.

pub mod generated {
    tonic::include_proto!("envoy.service.ratelimit.v3");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("ratelimit_descriptor");
}

pub use generated::{
    rate_limit_descriptor::Entry as RateLimitDescriptorEntry,
    rate_limit_response::{Code as ResponseCode, DescriptorStatus, RateLimit},
    rate_limit_service_server::{RateLimitService, RateLimitServiceServer},
    RateLimitDescriptor, RateLimitRequest, RateLimitResponse,
};
