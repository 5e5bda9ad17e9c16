use super::export::export_to_csv;
use super::AppState;
use crate::error::{EngineError, ErrorReport};
use crate::formula::{evaluate, EvalContext, FormulaError};
use crate::models::{BatchOptions, Record, RunConfig, Value};
use crate::service::{run_batch, BatchOutcome, Progress};
use axum::{
    extract::{Json, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// 请求体: 用量记录 + 价格目录 + 运行配置
#[derive(Debug, Deserialize)]
pub struct BatchMatchRequest {
    pub usage: Vec<Record>,
    pub catalog: Vec<Record>,
    pub config: RunConfig,
    /// 缺省时使用服务端 engine 配置
    #[serde(default)]
    pub options: Option<BatchOptions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

/// 响应体
#[derive(Debug, Serialize)]
pub struct BatchMatchResponse {
    pub success: bool,
    pub message: String,
    pub outcome: BatchOutcome,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: ErrorReport,
}

impl ErrorResponse {
    fn into_response_with(error: &EngineError, status: StatusCode) -> Response {
        let response = ErrorResponse {
            success: false,
            message: format!("Error: {}", error),
            error: error.report(),
        };
        (status, Json(response)).into_response()
    }
}

fn internal_error(message: String) -> Response {
    tracing::error!("{}", message);
    let body = serde_json::json!({ "success": false, "message": message });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 批量匹配计算接口; `?format=csv` 时返回 CSV
pub async fn batch_match(
    State(state): State<AppState>,
    Query(query): Query<FormatQuery>,
    Json(req): Json<BatchMatchRequest>,
) -> Response {
    let options = req
        .options
        .clone()
        .unwrap_or_else(|| state.config.to_batch_options());
    let formulas = state.formulas.clone();
    let usage_count = req.usage.len();

    // CPU 密集, 移出异步运行时
    let joined = tokio::task::spawn_blocking(move || {
        run_batch(
            &req.usage,
            &req.catalog,
            &req.config,
            &options,
            &formulas,
            &mut |p: &Progress| tracing::debug!("{}", p.message),
        )
    })
    .await;

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::warn!("Batch request rejected: {}", e);
            return ErrorResponse::into_response_with(&e, StatusCode::BAD_REQUEST);
        }
        Err(e) => return internal_error(format!("Batch task failed: {}", e)),
    };

    if query.format.as_deref() == Some("csv") {
        return match export_to_csv(&outcome.outputs) {
            Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response(),
            Err(e) => internal_error(format!("CSV export failed: {}", e)),
        };
    }

    let response = BatchMatchResponse {
        success: outcome.is_complete(),
        message: format!(
            "Processed {} usage records: {} outputs, {} failures",
            usage_count,
            outcome.outputs.len(),
            outcome.failures.len()
        ),
        outcome,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// 单公式试算请求
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub formula: String,
    #[serde(default)]
    pub usage: Record,
    #[serde(default)]
    pub price: Option<Record>,
    /// 供 `usage` 别名使用
    #[serde(default)]
    pub quantity_field: Option<String>,
    /// 供 `unitPrice` 别名使用
    #[serde(default)]
    pub price_field: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub success: bool,
    /// 规范化后的表达式
    pub expression: String,
    pub result: Value,
}

/// 公式试算接口
pub async fn evaluate_formula(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Response {
    let expr = match state.formulas.get_or_compile(&req.formula) {
        Ok(expr) => expr,
        Err(e) => return formula_error_response(e),
    };

    let ctx = EvalContext::new(&req.usage, req.price.as_ref())
        .with_aliases(req.quantity_field.as_deref(), req.price_field.as_deref());

    match evaluate(&expr, &ctx) {
        Ok(result) => {
            let response = EvaluateResponse {
                success: true,
                expression: expr.to_string(),
                result,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => formula_error_response(e),
    }
}

/// 编译期错误 400, 求值期错误 422
fn formula_error_response(error: FormulaError) -> Response {
    let status = if error.is_compile_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    ErrorResponse::into_response_with(&EngineError::from(error), status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;

    fn request(body: serde_json::Value) -> EvaluateRequest {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_status_codes() {
        let state = AppState::new(AppConfig::default());

        let ok = evaluate_formula(
            State(state.clone()),
            Json(request(json!({"formula": "usage.q * 2", "usage": {"q": "1.25"}}))),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let rejected = evaluate_formula(State(state.clone()), Json(request(json!({"formula": deep})))).await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let failed = evaluate_formula(State(state), Json(request(json!({"formula": "1 / 0"})))).await;
        assert_eq!(failed.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
