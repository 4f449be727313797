use crate::handlers::common::{map_service_error, success_response};
use crate::{
    auth::AuthUser, errors::ApiError, services::commerce::PaymentView, ApiResponse, AppState,
};
use axum::{extract::State, response::IntoResponse, routing::get, Router};

pub fn payments_routes() -> Router<AppState> {
    Router::new().route("/payments/history", get(payment_history))
}

/// List the caller's payments, newest first
#[utoipa::path(
    get,
    path = "/api/v1/payments/history",
    responses(
        (status = 200, description = "Payment history", body = ApiResponse<Vec<PaymentView>>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let payments = state
        .services
        .payments
        .history(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(payments))
}
