/// Commerce services module - cart, checkout and payment reconciliation
pub mod cart_service;
pub mod checkout_service;
pub mod payment_reconciler;
pub mod payment_service;
pub mod stock_ledger;

// Re-export services for convenience
pub use cart_service::{CartLine, CartService, CartView, ClearOutcome};
pub use checkout_service::{CheckoutService, CheckoutSessionView, CheckoutSettings};
pub use payment_reconciler::{PaymentReconciler, ReconcileOutcome};
pub use payment_service::{PaymentService, PaymentView};
pub use stock_ledger::StockLedger;
