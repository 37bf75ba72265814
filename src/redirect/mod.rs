//! Redirect HTTP surface

pub mod client_ip;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::{RedirectState, CACHE_HIT_HEADER};
pub use routes::create_redirect_router;
