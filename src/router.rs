use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::{
    AppState,
    middleware::{auth_middleware, log_errors},
    routes,
};

pub fn create_router(state: AppState) -> Router {
    // 将路由分为公开路由和受保护路由
    let public_routes = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route(
            "/auth/reset-password",
            get(routes::auth::secret_question).post(routes::auth::reset_password),
        );

    let protected_routes = Router::new()
        .route("/auth/session", get(routes::auth::session))
        .route("/auth/logout", post(routes::auth::logout))
        .route(
            "/posts",
            get(routes::post::list_posts).post(routes::post::create_post),
        )
        .route("/posts/events", get(routes::post::post_events))
        .route("/posts/{id}", delete(routes::post::delete_post))
        .route("/rate-limit/usage", get(routes::rate_limit::usage))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);
    let router = if state.config.api_base_uri.is_empty() || state.config.api_base_uri == "/" {
        api
    } else {
        Router::new().nest(&state.config.api_base_uri, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(state)
}
