use crate::{
    entities::commerce::{payment, Payment, PaymentKind, PaymentModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayEvent, PaymentGateway, VerificationError},
    services::commerce::cart_service::CartService,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// What a delivered webhook did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// This delivery moved the payment to completed and ran side effects.
    Completed {
        payment_id: Uuid,
        /// Lines removed from the buyer's cart; `None` for single-item payments.
        cart_items_cleared: Option<u64>,
    },
    /// A previous delivery already completed it.
    AlreadyCompleted { payment_id: Uuid },
    /// No payment carries this session id.
    UnknownSession { session_id: String },
    /// Authentic event of a type we do not act on.
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed { .. } => "completed",
            ReconcileOutcome::AlreadyCompleted { .. } => "already_completed",
            ReconcileOutcome::UnknownSession { .. } => "unknown_session",
            ReconcileOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Applies provider payment notifications to Payment records.
///
/// Deliveries may repeat, arrive out of order or race each other. The
/// pending-to-completed write is a single conditional update, so the
/// post-payment side effects run at most once per session.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        carts: CartService,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            carts,
        }
    }

    /// Authenticates and applies one raw webhook delivery.
    #[instrument(skip(self, payload, signature), fields(payload_len = payload.len()))]
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let signature = match signature {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                counter!("storefront_webhook_events_total", 1, "outcome" => "rejected");
                warn!("webhook rejected: missing signature");
                return Err(VerificationError::MissingSignature.into());
            }
        };

        let event = match self.gateway.verify_and_decode(payload, signature) {
            Ok(event) => event,
            Err(e) => {
                counter!("storefront_webhook_events_total", 1, "outcome" => "rejected");
                warn!(error = %e, "webhook rejected");
                return Err(e.into());
            }
        };

        let outcome = match event {
            GatewayEvent::CheckoutCompleted {
                event_id,
                session_id,
            } => {
                info!(%event_id, %session_id, "checkout completed notification");
                self.complete_session(&session_id).await?
            }
            GatewayEvent::Other {
                event_id,
                event_type,
            } => {
                info!(%event_id, %event_type, "ignoring webhook event");
                ReconcileOutcome::Ignored { event_type }
            }
        };

        counter!("storefront_webhook_events_total", 1, "outcome" => outcome.label());
        Ok(outcome)
    }

    /// Marks the payment for `session_id` completed if no delivery has yet.
    #[instrument(skip(self))]
    pub async fn complete_session(
        &self,
        session_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let now = Utc::now();
        let result = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Completed.to_value()),
            )
            .col_expr(payment::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::SessionId.eq(session_id))
            .filter(payment::Column::Status.ne(PaymentStatus::Completed.to_value()))
            .exec(&*self.db)
            .await?;

        let record = Payment::find()
            .filter(payment::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?;

        let Some(record) = record else {
            warn!(%session_id, "no payment record for completed session");
            return Ok(ReconcileOutcome::UnknownSession {
                session_id: session_id.to_string(),
            });
        };

        if result.rows_affected != 1 {
            info!(payment_id = %record.id, %session_id, "payment already completed");
            return Ok(ReconcileOutcome::AlreadyCompleted {
                payment_id: record.id,
            });
        }

        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                payment_id: record.id,
                session_id: record.session_id.clone(),
            })
            .await;

        let cart_items_cleared = self.run_side_effects(&record).await;

        info!(
            payment_id = %record.id,
            %session_id,
            kind = %record.kind,
            "payment completed"
        );
        Ok(ReconcileOutcome::Completed {
            payment_id: record.id,
            cart_items_cleared,
        })
    }

    async fn run_side_effects(&self, record: &PaymentModel) -> Option<u64> {
        match record.kind {
            PaymentKind::SingleItem => None,
            PaymentKind::Cart => match self.carts.clear(record.user_id).await {
                Ok(outcome) => Some(outcome.items_removed),
                Err(e) => {
                    // The payment stays completed either way
                    warn!(
                        error = %e,
                        payment_id = %record.id,
                        user_id = %record.user_id,
                        "failed to clear cart after payment"
                    );
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        let id = Uuid::new_v4();
        assert_eq!(
            ReconcileOutcome::Completed {
                payment_id: id,
                cart_items_cleared: Some(2)
            }
            .label(),
            "completed"
        );
        assert_eq!(
            ReconcileOutcome::AlreadyCompleted { payment_id: id }.label(),
            "already_completed"
        );
        assert_eq!(
            ReconcileOutcome::UnknownSession {
                session_id: "cs_x".into()
            }
            .label(),
            "unknown_session"
        );
        assert_eq!(
            ReconcileOutcome::Ignored {
                event_type: "charge.refunded".into()
            }
            .label(),
            "ignored"
        );
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let value = serde_json::to_value(ReconcileOutcome::Ignored {
            event_type: "charge.refunded".into(),
        })
        .unwrap();
        assert_eq!(value["outcome"], "ignored");
        assert_eq!(value["event_type"], "charge.refunded");
    }
}
