//! Infrastructure adapters: persistence, cloud, HTTP collaborators and queues.

pub mod cloud;
pub mod gateway_http;
pub mod memory;
pub mod messaging_http;
pub mod offset;
pub mod queue;
pub mod rate_limiter;
pub mod route_cache;
pub mod token;

pub use cloud::{CloudStep, InMemoryCloudProvider};
pub use gateway_http::HttpGatewayClient;
pub use memory::InMemoryStore;
pub use messaging_http::HttpMessagingEndpoint;
pub use offset::{FileOffsetStore, InMemoryOffsetStore};
pub use queue::{FileJobQueue, InMemoryJobQueue};
pub use rate_limiter::SlidingWindowRateLimiter;
pub use route_cache::InMemoryRouteCache;
pub use token::StaticTokenBroker;
