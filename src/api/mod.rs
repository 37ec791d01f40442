//! REST API module
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /api/smart-contract/deploy` - Compile and deploy `{code}`, returns `{appId}`
//! - `POST /api/smart-contract/interact` - `{appId, action, value?}` where
//!   `action` is `store` (returns `{message}`) or `read` (returns `{storedValue}`)
//!
//! Failures return `{error, kind}`.

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
