use crate::{
    errors::ServiceError, gateway::stripe::SIGNATURE_HEADER,
    services::commerce::ReconcileOutcome, AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;

/// Acknowledgement returned for every authenticated delivery
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

// POST /api/v1/webhook
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    request_body(content = String, description = "Raw provider event body", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Signature missing, invalid or payload undecodable", body = crate::errors::ErrorResponse),
        (status = 500, description = "Storage failure; the provider should redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Header is ASCII by contract; anything else is treated as absent
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .services
        .reconciler
        .handle_event(&body, signature)
        .await?;

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome,
        }),
    ))
}
