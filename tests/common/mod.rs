//! Shared harness for API-level tests: the real router wired to in-memory
//! stores and a scripted gateway that signs webhooks like Paystack does.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use payrail_backend::api::{build_router, AppState};
use payrail_backend::database::memory::InMemoryPaymentStore;
use payrail_backend::gateways::client::PaymentGateway;
use payrail_backend::gateways::error::{GatewayError, GatewayResult};
use payrail_backend::gateways::http::verify_hmac_sha512_hex;
use payrail_backend::gateways::types::{
    ChargeOutcome, ChargeRequest, GatewayName, GatewayWebhookEvent, Money, RefundOutcome,
    SettlementStatus, VerifyOutcome,
};
use payrail_backend::services::idempotency::InMemoryIdempotencyStore;
use payrail_backend::services::orders::InMemoryOrderService;
use payrail_backend::services::payment_orchestrator::PaymentOrchestrator;
use payrail_backend::services::webhook_processor::WebhookProcessor;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Always-accepting gateway with Paystack-style webhook verification.
pub struct TestGateway;

#[async_trait]
impl PaymentGateway for TestGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paystack
    }

    async fn initiate(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        Ok(ChargeOutcome {
            accepted: true,
            transaction_ref: Some(request.reference),
            checkout_url: Some("https://checkout.example.com/p/1".to_string()),
            message: None,
            raw: None,
        })
    }

    async fn verify(&self, _transaction_ref: &str) -> GatewayResult<VerifyOutcome> {
        Ok(VerifyOutcome {
            status: SettlementStatus::Paid,
            amount: None,
            raw: None,
        })
    }

    async fn refund(
        &self,
        _transaction_ref: &str,
        _amount: Money,
        _reason: &str,
    ) -> GatewayResult<RefundOutcome> {
        Ok(RefundOutcome {
            accepted: true,
            refund_id: Some("rf_test".to_string()),
            message: None,
        })
    }

    fn validate_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha512_hex(payload, WEBHOOK_SECRET, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: Value =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookPayload {
                message: e.to_string(),
            })?;
        let transaction_ref = parsed
            .get("data")
            .and_then(|v| v.get("reference"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = parsed
            .get("data")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(|s| match s {
                "success" => SettlementStatus::Paid,
                "failed" => SettlementStatus::Failed,
                _ => SettlementStatus::Unknown,
            });
        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Paystack,
            event_type: parsed
                .get("event")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            transaction_ref,
            status,
            payload: parsed,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub orders: Arc<InMemoryOrderService>,
}

pub fn spawn_app() -> TestApp {
    let gateway: Arc<dyn PaymentGateway> = Arc::new(TestGateway);
    let gateways = vec![gateway];
    let payments = Arc::new(InMemoryPaymentStore::new());
    let orders = Arc::new(InMemoryOrderService::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new(Duration::from_secs(3600)));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways.clone(),
        payments,
        orders.clone(),
        idempotency,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(gateways, orchestrator.clone()));

    let router = build_router(AppState {
        orchestrator,
        webhooks,
        pool: None,
    });

    TestApp { router, orders }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should not error")
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}
