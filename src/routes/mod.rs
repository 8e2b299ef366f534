pub mod auth;
pub mod post;
pub mod rate_limit;
