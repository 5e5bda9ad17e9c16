use price_match_rust::{api, AppConfig};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    let addr = config.addr();
    let app = api::router(api::AppState::new(config));

    // 启动服务器
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  GET  /health");
    info!("  POST /api/match/batch          - 匹配 + 计算 (?format=csv 导出)");
    info!("  POST /api/formula/evaluate     - 公式试算");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
