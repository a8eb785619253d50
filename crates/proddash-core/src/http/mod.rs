mod client;
mod rate_limit;
mod retry;
mod transport;

pub use client::{ApiClient, AuthRedirect, CredentialSource, LoginNotice};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, Transport};
