use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{
    CheckoutSession, GatewayError, GatewayEvent, PaymentGateway, SessionRequest,
    VerificationError, CHECKOUT_COMPLETED,
};
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Clock skew accepted for timestamps ahead of ours.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Stripe Checkout client holding the process-wide provider credentials.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    tolerance: Duration,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
        tolerance: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            tolerance,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(
            cfg.stripe_api_base.clone(),
            cfg.stripe_secret_key.clone(),
            cfg.stripe_webhook_secret.clone(),
            cfg.webhook_tolerance(),
        )
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&session_form(&request))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), "Stripe rejected checkout session");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let session_url = session
            .url
            .ok_or_else(|| GatewayError::InvalidResponse("session has no url".to_string()))?;

        debug!(session_id = %session.id, "created Stripe checkout session");
        Ok(CheckoutSession {
            session_id: session.id,
            session_url,
        })
    }

    fn verify_and_decode(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<GatewayEvent, VerificationError> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )?;
        decode_event(payload)
    }
}

/// Encodes a session request as Stripe's bracketed form parameters.
fn session_form(request: &SessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            request.currency.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.label.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    form
}

/// Checks a `t=<unix>,v1=<hex>[,v1=...]` header against the raw body.
///
/// The signed message is `"{t}.{body}"` under HMAC-SHA256. Any matching
/// `v1` entry is accepted so secrets can be rolled.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), VerificationError> {
    if secret.is_empty() {
        return Err(VerificationError::NotConfigured);
    }
    if header.trim().is_empty() {
        return Err(VerificationError::MissingSignature);
    }

    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            Some(_) => {}
            None => return Err(VerificationError::MalformedHeader),
        }
    }

    let timestamp_str = timestamp.ok_or(VerificationError::MalformedHeader)?;
    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| VerificationError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(VerificationError::MalformedHeader);
    }

    let age = now
        .checked_sub(timestamp)
        .ok_or(VerificationError::TimestampOutOfTolerance)?;
    let max_age = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if age > max_age || age < -MAX_FUTURE_SKEW_SECS {
        warn!(age, max_age, "webhook timestamp outside tolerance");
        return Err(VerificationError::TimestampOutOfTolerance);
    }

    for candidate in signatures {
        let Ok(provided) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| VerificationError::NotConfigured)?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        // verify_slice compares in constant time
        if mac.verify_slice(&provided).is_ok() {
            return Ok(());
        }
    }

    Err(VerificationError::SignatureMismatch)
}

/// Builds the signature header Stripe would send for `payload`.
pub fn sign_payload(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, VerificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::NotConfigured)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Decodes an already-authenticated event body.
pub fn decode_event(payload: &[u8]) -> Result<GatewayEvent, VerificationError> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| VerificationError::InvalidPayload(e.to_string()))?;

    if event.event_type != CHECKOUT_COMPLETED {
        return Ok(GatewayEvent::Other {
            event_id: event.id,
            event_type: event.event_type,
        });
    }

    let session_id = event
        .data
        .object
        .get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| VerificationError::InvalidPayload("missing session id".to_string()))?;

    Ok(GatewayEvent::CheckoutCompleted {
        event_id: event.id,
        session_id: session_id.to_string(),
    })
}
