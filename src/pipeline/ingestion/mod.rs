// Pipeline ingestion: rate limiting, the request gateway and per-source clients

pub mod gateway;
pub mod rate_limiter;
pub mod source_client;

pub use gateway::{RequestGateway, RetryPolicy, SourceConfig};
pub use rate_limiter::{RateLimitConfig, RateLimiter, UnregisteredPolicy};
pub use source_client::SourceClient;
