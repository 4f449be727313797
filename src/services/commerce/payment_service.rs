use crate::{
    entities::commerce::{payment, Payment, PaymentKind, PaymentModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub session_id: String,
    pub kind: PaymentKind,
    pub amount: Decimal,
    pub currency: String,
    pub label: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentModel> for PaymentView {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            session_id: model.session_id,
            kind: model.kind,
            amount: model.amount,
            currency: model.currency,
            label: model.label,
            status: model.status,
            created_at: model.created_at,
            completed_at: model.completed_at,
        }
    }
}

/// Read side of Payment records plus stale-session expiry.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// The caller's payments, newest first.
    #[instrument(skip(self))]
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<PaymentView>, ServiceError> {
        let rows = Payment::find()
            .filter(payment::Column::UserId.eq(user_id))
            .order_by_desc(payment::Column::CreatedAt)
            .order_by_desc(payment::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(PaymentView::from).collect())
    }

    /// Moves pending payments older than `ttl` to expired. Returns how many moved.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, ttl: Duration) -> Result<u64, ServiceError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ServiceError::ValidationError(format!("invalid ttl: {}", e)))?;
        let now = Utc::now();
        let cutoff = now
            .checked_sub_signed(ttl)
            .ok_or_else(|| ServiceError::ValidationError("ttl is out of range".to_string()))?;

        let result = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Expired.to_value()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.to_value()))
            .filter(payment::Column::CreatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;

        let count = result.rows_affected;
        if count > 0 {
            counter!("storefront_payments_expired_total", count);
            self.event_sender
                .send_or_log(Event::PaymentsExpired { count })
                .await;
            info!(count, "expired stale pending payments");
        }
        Ok(count)
    }

    /// Runs [`expire_stale`](Self::expire_stale) every `interval` until aborted.
    pub fn spawn_expiry_sweeper(self: Arc<Self>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_stale(ttl).await {
                    error!(error = %e, "payment expiry sweep failed");
                }
            }
        })
    }
}
