use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Core API",
        version = env!("CARGO_PKG_VERSION"),
        description = r#"
# Storefront Core API

Cart, checkout and payment reconciliation for a storefront.

## Authentication

Caller endpoints expect a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by the provider's `Stripe-Signature`
header instead.

## Error Handling

Failures share one body shape:

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock: Only 3 items available in stock",
  "details": {"available": 3},
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Checkout", description = "Hosted checkout session endpoints"),
        (name = "Payments", description = "Payment history and provider webhooks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,
        crate::handlers::commerce::carts::clear_cart,

        // Checkout
        crate::handlers::commerce::checkout::create_single_item_checkout,
        crate::handlers::commerce::checkout::create_cart_checkout,

        // Payments
        crate::handlers::commerce::payments::payment_history,
        crate::handlers::payment_webhooks::payment_webhook,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::commerce::carts::AddItemRequest,
            crate::handlers::commerce::carts::UpdateQuantityRequest,
            crate::handlers::commerce::checkout::SingleItemCheckoutRequest,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::handlers::health::HealthResponse,
            crate::services::commerce::CartView,
            crate::services::commerce::CartLine,
            crate::services::commerce::ClearOutcome,
            crate::services::commerce::CheckoutSessionView,
            crate::services::commerce::PaymentView,
            crate::services::commerce::ReconcileOutcome,
            crate::entities::commerce::PaymentKind,
            crate::entities::commerce::PaymentStatus,
            crate::errors::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Generated document, served at `/api-docs/openapi.json`.
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDocV1::openapi()
}
