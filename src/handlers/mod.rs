pub mod commerce;
pub mod common;
pub mod health;
pub mod payment_webhooks;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::commerce::{
    CartService, CheckoutService, CheckoutSettings, PaymentReconciler, PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against one database pool, event channel and
    /// payment gateway.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let cart = CartService::new(db_pool.clone(), event_sender.clone());

        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway.clone(),
            CheckoutSettings::from(config),
        ));

        let reconciler = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            cart.clone(),
        ));

        let payments = Arc::new(PaymentService::new(db_pool, event_sender));

        Self {
            cart: Arc::new(cart),
            checkout,
            reconciler,
            payments,
        }
    }
}
