use social_api::{config::Config, create_app, state::AppState};
use std::{net::SocketAddr, sync::Arc};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    init_tracing(&config);

    info!("Starting social-api service ({})...", config.environment);
    if config.is_production() && config.secret_key.len() < 32 {
        warn!("SECRET_KEY is shorter than 32 bytes; tokens are easier to forge");
    }

    let app_state = Arc::new(AppState::new(config.clone()).await?);
    app_state.db.verify_connection().await?;

    // 启动后台任务
    start_background_tasks(app_state.clone());

    let app = create_app(app_state);

    // 启动主服务器
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::new(&config.log_level);

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn start_background_tasks(app_state: Arc<AppState>) {
    // 清理过期的吊销令牌和限流状态
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(3600)); // 每小时执行一次

        loop {
            interval.tick().await;
            match app_state.auth_service.cleanup_revoked_tokens().await {
                Ok(removed) => debug!("Revoked token cleanup removed {} rows", removed),
                Err(e) => error!("Failed to cleanup revoked tokens: {}", e),
            }

            let tracked = app_state.prune_rate_limiter();
            debug!("Rate limiter now tracks {} clients", tracked);
        }
    });

    info!("Background tasks started successfully");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
