//! Upstream commerce query API: wire types, transport and the paginated fetch client.

pub mod types;
pub mod client;
pub mod http;

pub use client::{FetchClient, FetchOutcome, Truncation, UpstreamApi};
pub use http::HttpUpstream;
pub use types::{
    EntityKind, ErrorClass, FetchPage, PageRequest, PageResponse, QueryFilter, UpstreamError,
    UPSTREAM_PAGE_LIMIT,
};
