use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use postboard::{
    AppState,
    clock::SystemClock,
    config::{Config, StoreBackend},
    posts::PgPostRepository,
    rate_limit::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore, RedisRateLimitStore},
    router::create_router,
    session::{
        MemorySessionRevocations, PgSessionRevocations, RedisSessionRevocations,
        SessionRevocations,
    },
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().context("Failed to load configuration")?;

    #[cfg(debug_assertions)]
    info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'postboard';").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    // 限流计数和已注销会话使用同一种存储
    let calendar = config.calendar();
    let (store, sessions) = match config.rate_limit_store {
        StoreBackend::Postgres => {
            let store: Arc<dyn RateLimitStore> =
                Arc::new(PgRateLimitStore::new(pool.clone(), calendar));
            let sessions: Arc<dyn SessionRevocations> =
                Arc::new(PgSessionRevocations::new(pool.clone()));
            (store, sessions)
        }
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required when RATE_LIMIT_STORE=redis")?;
            let client = Arc::new(redis::Client::open(url).context("Failed to create Redis client")?);
            let store: Arc<dyn RateLimitStore> =
                Arc::new(RedisRateLimitStore::new(client.clone(), calendar));
            let sessions: Arc<dyn SessionRevocations> =
                Arc::new(RedisSessionRevocations::new(client));
            (store, sessions)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; counters and logouts reset on restart");
            let store: Arc<dyn RateLimitStore> = Arc::new(MemoryRateLimitStore::new(calendar));
            let sessions: Arc<dyn SessionRevocations> = Arc::new(MemorySessionRevocations::new());
            (store, sessions)
        }
    };
    info!(
        backend = ?config.rate_limit_store,
        per_minute = config.rate_limits.per_minute,
        per_hour = config.rate_limits.per_hour,
        per_day = config.rate_limits.per_day,
        "Rate limiting configured"
    );

    // 设置应用状态
    let state = AppState::new(
        pool.clone(),
        config.clone(),
        Arc::new(SystemClock),
        store,
        Arc::new(PgPostRepository::new(pool)),
        sessions,
    );

    let router = create_router(state);

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
