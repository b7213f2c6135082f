pub mod request_logger;
pub mod response;

pub use request_logger::request_logger;
pub use response::{ApiResponse, ApiResult, CachePolicy, LONG_CACHE_SECS};
