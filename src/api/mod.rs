pub mod export;
pub mod handlers;

pub use export::export_to_csv;
pub use handlers::{batch_match, evaluate_formula, health_check};

use crate::config::AppConfig;
use crate::formula::FormulaCache;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// 共享状态: 配置 + 跨请求复用的公式编译缓存
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub formulas: Arc<FormulaCache>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            formulas: Arc::new(FormulaCache::new()),
        }
    }
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/match/batch", post(batch_match))
        .route("/api/formula/evaluate", post(evaluate_formula))
        .with_state(state)
        .layer(ServiceBuilder::new())
}
