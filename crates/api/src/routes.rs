use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tracing::Instrument;
use uuid::Uuid;

use stockcast_core::predict::error::ErrorBody;
use stockcast_core::predict::{ErrorKind, PredictError, Predictor};

#[derive(Clone)]
pub struct AppState {
    pub predictor: Option<Predictor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub stock_code: Option<String>,
}

pub fn router(state: AppState, public_dir: Option<&str>) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/predict", post(predict))
        .with_state(state);

    match public_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();

    let Some(predictor) = &state.predictor else {
        return error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "price data provider is not configured",
        );
    };

    let query = match body {
        Ok(Json(req)) => req.stock_code.unwrap_or_default(),
        Err(rejection) => {
            tracing::info!(%request_id, error = %rejection, "rejected predict body");
            return error_body(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };

    tracing::info!(%request_id, query = %query, "predict request received");

    let span = tracing::info_span!("request", %request_id);
    match predictor.run(&query).instrument(span).await {
        Ok(result) => {
            tracing::info!(
                %request_id,
                stock_name = %result.stock_name,
                trend = result.trend.as_str(),
                predicted_price = result.predicted_price,
                "prediction served"
            );
            Json(result).into_response()
        }
        Err(err) => predict_error_response(request_id, err),
    }
}

fn predict_error_response(request_id: Uuid, err: PredictError) -> Response {
    let status = match err.kind() {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = err.to_body();

    if status.is_server_error() {
        tracing::error!(%request_id, error = %err, "prediction failed");
        sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
    } else {
        tracing::info!(%request_id, error = %err, "prediction rejected");
    }

    (status, Json(body)).into_response()
}

fn error_body(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}
