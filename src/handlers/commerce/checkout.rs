use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::{
    auth::AuthUser, errors::ApiError, services::commerce::CheckoutSessionView, ApiResponse,
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/single", post(create_single_item_checkout))
        .route("/checkout/cart", post(create_cart_checkout))
}

/// Start a hosted checkout for one labelled amount
#[utoipa::path(
    post,
    path = "/api/v1/checkout/single",
    request_body = SingleItemCheckoutRequest,
    responses(
        (status = 201, description = "Checkout session created", body = ApiResponse<CheckoutSessionView>),
        (status = 400, description = "Invalid label or amount", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider rejected the request", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_single_item_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<SingleItemCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let session = state
        .services
        .checkout
        .create_single_item_session(user.user_id, &payload.label, payload.amount)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(session))
}

/// Start a hosted checkout for the caller's whole cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout/cart",
    responses(
        (status = 201, description = "Checkout session created", body = ApiResponse<CheckoutSessionView>),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider rejected the request", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_cart_checkout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .create_cart_session(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(session))
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SingleItemCheckoutRequest {
    /// Line label shown on the provider's payment page
    #[validate(length(min = 1, max = 255))]
    pub label: String,
    /// Amount in major currency units, at most two decimal places
    #[schema(value_type = String, example = "25.00")]
    pub amount: Decimal,
}
