use crate::domain::{BillingEvent, BillingSubscription, CheckoutSession, SubscriptionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{header, Client};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum BillingProviderError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// Outbound calls to the billing provider plus verification of its webhooks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Create a subscription-mode checkout session and return its hosted URL.
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<String, BillingProviderError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, BillingProviderError>;

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<BillingSubscription, BillingProviderError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingProviderError>;
}

pub struct StripeClient {
    client: Client,
    base_url: String,
    webhook_secret: String,
    webhook_tolerance: Duration,
}

impl StripeClient {
    pub fn new(
        secret_key: &str,
        webhook_secret: String,
        base_url: String,
        webhook_tolerance_secs: i64,
    ) -> Result<Self, BillingProviderError> {
        if secret_key.is_empty() {
            return Err(BillingProviderError::InvalidConfig(
                "Stripe secret key is empty".to_string(),
            ));
        }

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", secret_key))
            .map_err(|e| BillingProviderError::InvalidConfig(format!("Invalid secret key: {}", e)))?;
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                BillingProviderError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            webhook_secret,
            webhook_tolerance: Duration::seconds(webhook_tolerance_secs),
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<reqwest::Response, BillingProviderError> {
        let resp = request
            .send()
            .await
            .map_err(|e| BillingProviderError::RequestFailed(e.to_string()))?;

        match resp.status().as_u16() {
            429 => Err(BillingProviderError::RateLimited),
            404 => Err(BillingProviderError::NotFound(resource.to_string())),
            _ if !resp.status().is_success() => {
                let error_text = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(BillingProviderError::RequestFailed(error_text))
            }
            _ => Ok(resp),
        }
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<String, BillingProviderError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "subscription".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("line_items[0][price]".into(), request.price_id.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("customer_email".into(), request.customer_email.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let resp = self
            .send(
                self.client
                    .post(format!("{}/checkout/sessions", self.base_url))
                    .form(&form),
                "checkout session",
            )
            .await?;

        let session: StripeCheckoutSessionResponse = resp
            .json()
            .await
            .map_err(|e| BillingProviderError::InvalidResponse(e.to_string()))?;

        session.url.ok_or_else(|| {
            BillingProviderError::InvalidResponse("Checkout session has no url".to_string())
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, BillingProviderError> {
        let resp = self
            .send(
                self.client
                    .get(format!("{}/subscriptions/{}", self.base_url, subscription_id)),
                subscription_id,
            )
            .await?;

        let subscription: StripeSubscriptionObject = resp
            .json()
            .await
            .map_err(|e| BillingProviderError::InvalidResponse(e.to_string()))?;

        subscription.into_billing_subscription()
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<BillingSubscription, BillingProviderError> {
        let form = [("cancel_at_period_end", cancel_at_period_end.to_string())];

        let resp = self
            .send(
                self.client
                    .post(format!("{}/subscriptions/{}", self.base_url, subscription_id))
                    .form(&form),
                subscription_id,
            )
            .await?;

        let subscription: StripeSubscriptionObject = resp
            .json()
            .await
            .map_err(|e| BillingProviderError::InvalidResponse(e.to_string()))?;

        subscription.into_billing_subscription()
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingProviderError> {
        verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            self.webhook_tolerance,
            Utc::now(),
        )?;
        parse_event(payload)
    }
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// The signed message is `"{t}.{payload}"`, keyed with the endpoint secret.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), BillingProviderError> {
    if secret.is_empty() {
        return Err(BillingProviderError::InvalidConfig(
            "Webhook secret is empty".to_string(),
        ));
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| BillingProviderError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(BillingProviderError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }

    let signed_at = ts_to_datetime(timestamp)
        .ok_or_else(|| BillingProviderError::InvalidSignature("bad timestamp".to_string()))?;
    if (now - signed_at).abs() > tolerance {
        return Err(BillingProviderError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingProviderError::InvalidConfig(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());
    if !matched {
        return Err(BillingProviderError::InvalidSignature(
            "no matching signature".to_string(),
        ));
    }

    Ok(())
}

/// Decode a verified webhook body into the event kinds we reconcile.
pub fn parse_event(payload: &[u8]) -> Result<BillingEvent, BillingProviderError> {
    let envelope: StripeEventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| BillingProviderError::InvalidPayload(e.to_string()))?;

    let object = envelope.data.object;
    let event = match envelope.type_.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSessionObject = serde_json::from_value(object)
                .map_err(|e| BillingProviderError::InvalidPayload(e.to_string()))?;
            BillingEvent::CheckoutCompleted(CheckoutSession {
                id: session.id,
                customer_id: session.customer,
                subscription_id: session.subscription,
                metadata: session.metadata.unwrap_or_default(),
            })
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let subscription: StripeSubscriptionObject = serde_json::from_value(object)
                .map_err(|e| BillingProviderError::InvalidPayload(e.to_string()))?;
            let details = subscription
                .into_billing_subscription()
                .map_err(|e| BillingProviderError::InvalidPayload(e.to_string()))?;
            if envelope.type_ == "customer.subscription.created" {
                BillingEvent::SubscriptionCreated(details)
            } else {
                BillingEvent::SubscriptionUpdated(details)
            }
        }
        "customer.subscription.deleted" => {
            let deleted: StripeObjectId = serde_json::from_value(object)
                .map_err(|e| BillingProviderError::InvalidPayload(e.to_string()))?;
            BillingEvent::SubscriptionDeleted {
                subscription_id: deleted.id,
            }
        }
        other => {
            debug!(event_type = other, "Ignoring unhandled billing event type");
            BillingEvent::Unhandled {
                event_type: other.to_string(),
            }
        }
    };

    Ok(event)
}

fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[derive(Debug, Deserialize)]
struct StripeEventEnvelope {
    #[serde(rename = "type")]
    type_: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionObject {
    id: String,
    customer: Option<String>,
    subscription: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionObject {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    items: StripeList<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: StripePrice,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
}

impl StripeSubscriptionObject {
    /// Period bounds live on the first item in newer API versions and on the
    /// subscription itself in older ones.
    fn into_billing_subscription(self) -> Result<BillingSubscription, BillingProviderError> {
        let item = self.items.data.into_iter().next().ok_or_else(|| {
            BillingProviderError::InvalidResponse("Subscription has no items".to_string())
        })?;

        let start = item
            .current_period_start
            .or(self.current_period_start)
            .and_then(ts_to_datetime)
            .ok_or_else(|| {
                BillingProviderError::InvalidResponse("Missing current_period_start".to_string())
            })?;
        let end = item
            .current_period_end
            .or(self.current_period_end)
            .and_then(ts_to_datetime)
            .ok_or_else(|| {
                BillingProviderError::InvalidResponse("Missing current_period_end".to_string())
            })?;

        let status = SubscriptionStatus::from_str(&self.status).map_err(|_| {
            BillingProviderError::InvalidResponse(format!("Unknown status: {}", self.status))
        })?;

        Ok(BillingSubscription {
            id: self.id,
            customer_id: self.customer,
            price_id: item.price.id,
            interval: item.price.recurring.map(|r| r.interval),
            status,
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: self.cancel_at_period_end,
        })
    }
}
