//! Payment provider boundary.
//!
//! The checkout builder and the webhook reconciler only talk to the provider
//! through [`PaymentGateway`]. The production implementation is
//! [`stripe::StripeGateway`]; tests substitute their own.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::errors::ServiceError;

pub mod stripe;

pub use stripe::StripeGateway;

/// Event type the reconciler acts on.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// One priced line of a checkout session. `unit_amount` is in minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub label: String,
    pub unit_amount: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub line_items: Vec<LineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

/// Provider-side checkout session handed back to the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub session_url: String,
}

/// Authenticated, decoded provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    CheckoutCompleted { event_id: String, session_id: String },
    Other { event_id: String, event_type: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::CheckoutCompleted { .. } => CHECKOUT_COMPLETED,
            GatewayEvent::Other { event_type, .. } => event_type.as_str(),
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            GatewayEvent::CheckoutCompleted { event_id, .. }
            | GatewayEvent::Other { event_id, .. } => event_id.as_str(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment provider is not configured")]
    NotConfigured,
    #[error("payment provider unreachable: {0}")]
    Transport(String),
    #[error("payment provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("missing signature")]
    MissingSignature,
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<VerificationError> for ServiceError {
    fn from(err: VerificationError) -> Self {
        ServiceError::Unauthenticated(err.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a hosted checkout session for the given priced lines.
    async fn create_session(&self, request: SessionRequest)
        -> Result<CheckoutSession, GatewayError>;

    /// Authenticates a raw webhook body against its signature header and
    /// decodes it. Nothing is trusted from `payload` before this succeeds.
    fn verify_and_decode(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<GatewayEvent, VerificationError>;
}
