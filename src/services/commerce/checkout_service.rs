use crate::{
    config::AppConfig,
    entities::commerce::{cart, payment, Cart, Payment, PaymentKind, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{LineItem, PaymentGateway, SessionRequest},
    services::commerce::cart_service::CartService,
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

const MAX_LABEL_LEN: usize = 255;

/// Redirect targets and currency applied to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.default_currency.to_lowercase(),
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        }
    }
}

/// What the buyer needs to continue on the provider's hosted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionView {
    pub payment_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

/// Turns a priced request into a provider checkout session plus a
/// pending Payment record.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

struct PendingPayment {
    user_id: Uuid,
    kind: PaymentKind,
    amount: Decimal,
    label: String,
    line_items: Vec<LineItem>,
    metadata: BTreeMap<String, String>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            settings,
        }
    }

    /// Opens a session for one arbitrary labelled amount.
    #[instrument(skip(self))]
    pub async fn create_single_item_session(
        &self,
        user_id: Uuid,
        label: &str,
        amount: Decimal,
    ) -> Result<CheckoutSessionView, ServiceError> {
        let label = validate_label(label)?;
        validate_amount(amount)?;
        let unit_amount = to_minor_units(amount)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("product_name".to_string(), label.clone());

        self.open_session(PendingPayment {
            user_id,
            kind: PaymentKind::SingleItem,
            amount,
            line_items: vec![LineItem {
                label: label.clone(),
                unit_amount,
                quantity: 1,
            }],
            label,
            metadata,
        })
        .await
    }

    /// Opens a session covering the caller's whole cart, priced now.
    ///
    /// The cart itself is left untouched; it is emptied only once the
    /// provider confirms payment.
    #[instrument(skip(self))]
    pub async fn create_cart_session(
        &self,
        user_id: Uuid,
    ) -> Result<CheckoutSessionView, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let view = CartService::load_view(&*self.db, cart.id).await?;
        if view.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let line_items = view
            .items
            .iter()
            .map(|line| {
                Ok(LineItem {
                    label: line.product_name.clone(),
                    unit_amount: to_minor_units(line.unit_price)?,
                    quantity: line.quantity,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("cart_checkout".to_string(), "true".to_string());
        metadata.insert("total_items".to_string(), view.total_items.to_string());

        self.open_session(PendingPayment {
            user_id,
            kind: PaymentKind::Cart,
            amount: view.total_price,
            label: format!("Cart Checkout ({} items)", view.total_items),
            line_items,
            metadata,
        })
        .await
    }

    async fn open_session(
        &self,
        pending: PendingPayment,
    ) -> Result<CheckoutSessionView, ServiceError> {
        let kind = pending.kind;
        let request = SessionRequest {
            line_items: pending.line_items,
            currency: self.settings.currency.clone(),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            metadata: pending.metadata,
        };

        let session = match self.gateway.create_session(request).await {
            Ok(session) => session,
            Err(e) => {
                counter!("storefront_checkout_sessions_total", 1, "kind" => kind.to_string(), "result" => "gateway_error");
                error!(error = %e, %kind, "payment provider refused checkout session");
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let record = payment::ActiveModel {
            id: Set(payment_id),
            user_id: Set(pending.user_id),
            session_id: Set(session.session_id.clone()),
            kind: Set(kind),
            amount: Set(pending.amount),
            currency: Set(self.settings.currency.clone()),
            label: Set(pending.label),
            status: Set(PaymentStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        };

        if let Err(e) = Payment::insert(record).exec_without_returning(&*self.db).await {
            counter!("storefront_checkout_sessions_total", 1, "kind" => kind.to_string(), "result" => "storage_error");
            error!(
                error = %e,
                session_id = %session.session_id,
                "provider session created but payment record was not stored"
            );
            return Err(ServiceError::InternalError(format!(
                "failed to record payment for session {}",
                session.session_id
            )));
        }

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                payment_id,
                session_id: session.session_id.clone(),
            })
            .await;
        counter!("storefront_checkout_sessions_total", 1, "kind" => kind.to_string(), "result" => "created");

        info!(
            %payment_id,
            session_id = %session.session_id,
            %kind,
            amount = %pending.amount,
            "checkout session created"
        );

        Ok(CheckoutSessionView {
            payment_id,
            session_id: session.session_id,
            checkout_url: session.session_url,
        })
    }
}

fn validate_label(label: &str) -> Result<String, ServiceError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ServiceError::ValidationError(
            "Product name is required".to_string(),
        ));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(ServiceError::ValidationError(format!(
            "Product name must be at most {} characters",
            MAX_LABEL_LEN
        )));
    }
    Ok(label.to_string())
}

/// Accepts 0.01 through 99 999 999.99 with at most two decimal places.
pub fn validate_amount(amount: Decimal) -> Result<(), ServiceError> {
    let min = Decimal::new(1, 2);
    let max = Decimal::new(9_999_999_999, 2);

    if amount < min || amount > max {
        return Err(ServiceError::ValidationError(format!(
            "Amount must be between {} and {}",
            min, max
        )));
    }
    if amount.normalize().scale() > 2 {
        return Err(ServiceError::ValidationError(
            "Amount must have at most two decimal places".to_string(),
        ));
    }
    Ok(())
}

/// Converts a major-unit amount to integer minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("Amount {} is out of range", amount)))
}
