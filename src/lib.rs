use std::sync::Arc;

use config::Config;
use sqlx::PgPool;

use clock::Clock;
use feed::FeedHub;
use posts::{PostRepository, PostService};
use rate_limit::{RateLimitStore, RateLimiter};
use session::SessionRevocations;

pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod middleware;
pub mod posts;
pub mod rate_limit;
pub mod router;
pub mod routes;
pub mod session;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: RateLimiter,
    pub posts: PostService,
    pub feed: FeedHub,
    pub sessions: Arc<dyn SessionRevocations>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RateLimitStore>,
        repository: Arc<dyn PostRepository>,
        sessions: Arc<dyn SessionRevocations>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(store, config.rate_limits);
        let feed = FeedHub::new();
        let posts = PostService::new(
            repository,
            rate_limiter.clone(),
            feed.clone(),
            config.post_max_length,
        );

        Self {
            pool,
            config,
            clock,
            rate_limiter,
            posts,
            feed,
            sessions,
        }
    }
}
