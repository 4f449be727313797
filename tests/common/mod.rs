#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_core::{
    auth::{Claims, TokenVerifier},
    config::AppConfig,
    db,
    entities::commerce::{product, ProductModel},
    events::{Event, EventSender},
    gateway::{
        stripe, CheckoutSession, GatewayError, GatewayEvent, PaymentGateway, SessionRequest,
        VerificationError,
    },
    handlers::AppServices,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str =
    "integration_test_secret_that_is_comfortably_longer_than_sixty_four_characters";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// Payment provider stand-in. Records every session request and verifies
/// webhooks with the real signature scheme against [`WEBHOOK_SECRET`].
#[derive(Default)]
pub struct RecordingGateway {
    pub requests: Mutex<Vec<SessionRequest>>,
    counter: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingGateway {
    pub fn fail_next_sessions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<SessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "Invalid currency".to_string(),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request);
        let session_id = format!("cs_test_{n}");
        Ok(CheckoutSession {
            session_url: format!("https://checkout.example.test/pay/{session_id}"),
            session_id,
        })
    }

    fn verify_and_decode(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<GatewayEvent, VerificationError> {
        stripe::verify_signature(
            payload,
            signature,
            WEBHOOK_SECRET,
            Duration::from_secs(300),
            Utc::now().timestamp(),
        )?;
        stripe::decode_event(payload)
    }
}

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    events: AsyncMutex<mpsc::Receiver<Event>>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_webhook_secret = WEBHOOK_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(event_tx));

        let gateway = Arc::new(RecordingGateway::default());
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), gateway.clone(), &cfg);

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg.clone()),
            event_sender,
            services,
            token_verifier: Arc::new(TokenVerifier::new(&cfg.jwt_secret)),
        };

        let router = storefront_core::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            events: AsyncMutex::new(event_rx),
            _db_dir: db_dir,
        }
    }

    /// Mint a bearer token for `user_id`.
    pub fn token_for(&self, user_id: Uuid) -> String {
        let now = Utc::now().timestamp();
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &Claims {
                sub: user_id.to_string(),
                iat: now,
                exp: now + 3600,
            },
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated JSON request as `user_id`.
    pub async fn request_as(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(user_id);
        self.request(method, uri, body, Some(&token)).await
    }

    /// Deliver a raw webhook body with an optional signature header.
    pub async fn deliver_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(stripe::SIGNATURE_HEADER, sig);
        }

        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> ProductModel {
        self.insert_product(name, price, stock, true).await
    }

    pub async fn seed_inactive_product(&self, name: &str, price: Decimal) -> ProductModel {
        self.insert_product(name, price, 100, false).await
    }

    async fn insert_product(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        is_active: bool,
    ) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    /// Events emitted since the last call.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Signed `checkout.session.completed` delivery for `session_id`.
pub fn completed_event(session_id: &str) -> (Vec<u8>, String) {
    signed(serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": { "id": session_id, "object": "checkout.session" } }
    }))
}

/// Serializes and signs an arbitrary event body.
pub fn signed(event: Value) -> (Vec<u8>, String) {
    let payload = serde_json::to_vec(&event).expect("serialize event");
    let header = stripe::sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload)
        .expect("sign payload");
    (payload, header)
}

pub async fn response_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("response body is json")
}

/// Parses a decimal rendered as a JSON string or number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
