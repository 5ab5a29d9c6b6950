pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::{intercept, InterceptorState, RATE_LIMIT_MESSAGE};
pub use routes::create_router;
