use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config;

use super::models::PricedLineItem;

/// key: billing-provider-error -> provider failures the engine reasons about
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Same idempotency key, different or still-processing request. The
    /// provisioner treats this as a signal to search, never a hard failure.
    #[error("idempotency conflict")]
    IdempotencyConflict,
    #[error("provider rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Subscription object as the provider reports it. Referenced, never owned.
#[derive(Debug, Clone)]
pub struct ExternalSubscription {
    pub id: String,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
    pub items: Vec<ExternalLineItem>,
    pub latest_invoice: Option<String>,
    pub pending_setup_intent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalLineItem {
    pub price_id: String,
}

#[derive(Debug, Clone)]
pub struct ExternalInvoice {
    pub id: String,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub confirmation_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalSetupIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

/// Everything a compliant provider needs to create one incomplete
/// subscription: recurring items, one-time invoice additions, tags, and the
/// key that collapses duplicate creates.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub recurring_items: Vec<PricedLineItem>,
    pub one_time_items: Vec<PricedLineItem>,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

/// key: billing-provider -> seam to the external payment provider
///
/// Every operation is idempotent or read-only; the engine never assumes the
/// provider and the local store are consistent.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn search_subscriptions(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<Vec<ExternalSubscription>, ProviderError>;

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<ExternalSubscription, ProviderError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ExternalSubscription, ProviderError>;

    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ExternalSubscription, ProviderError>;

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError>;

    /// Finalize a draft invoice, instructing automatic advancement.
    async fn finalize_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError>;

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<ExternalSetupIntent, ProviderError>;
}

#[async_trait]
impl<P: PaymentProvider + ?Sized> PaymentProvider for Arc<P> {
    async fn search_subscriptions(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<Vec<ExternalSubscription>, ProviderError> {
        (**self).search_subscriptions(customer_id, status).await
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<ExternalSubscription, ProviderError> {
        (**self).create_subscription(request).await
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ExternalSubscription, ProviderError> {
        (**self).retrieve_subscription(subscription_id).await
    }

    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ExternalSubscription, ProviderError> {
        (**self)
            .update_subscription_metadata(subscription_id, metadata)
            .await
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError> {
        (**self).retrieve_invoice(invoice_id).await
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError> {
        (**self).finalize_invoice(invoice_id).await
    }

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<ExternalSetupIntent, ProviderError> {
        (**self).retrieve_setup_intent(setup_intent_id).await
    }
}

/// key: billing-provider-stripe -> REST gateway to a Stripe-compatible API
pub struct StripeGateway {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl StripeGateway {
    pub fn new(base_url: String, secret: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(
            config::PAYMENT_PROVIDER_BASE_URL.clone(),
            config::PAYMENT_PROVIDER_SECRET.clone(),
            Duration::from_secs(*config::PAYMENT_PROVIDER_TIMEOUT_SECS),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ProviderError> {
        let response = builder.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if status.is_success() {
            return Ok(body);
        }
        let error_type = jstr(&body, &["error", "type"]).unwrap_or_default();
        let message = jstr(&body, &["error", "message"])
            .unwrap_or("provider returned no error message")
            .to_string();
        if status.as_u16() == 409 || error_type == "idempotency_error" {
            debug!(%message, "provider reported an idempotency conflict");
            return Err(ProviderError::IdempotencyConflict);
        }
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    async fn search_subscriptions(
        &self,
        customer_id: &str,
        status: &str,
    ) -> Result<Vec<ExternalSubscription>, ProviderError> {
        let body = self
            .send(self.request(Method::GET, "/v1/subscriptions").query(&[
                ("customer", customer_id),
                ("status", status),
                ("limit", "100"),
            ]))
            .await?;
        let subscriptions = body
            .get("data")
            .and_then(Value::as_array)
            .map(|data| data.iter().map(parse_subscription).collect())
            .unwrap_or_default();
        Ok(subscriptions)
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<ExternalSubscription, ProviderError> {
        let mut params: Vec<(String, String)> = vec![
            ("customer".into(), request.customer_id.clone()),
            // Never attempt a charge without explicit client confirmation.
            ("payment_behavior".into(), "default_incomplete".into()),
            ("proration_behavior".into(), "none".into()),
        ];
        for (index, item) in request.recurring_items.iter().enumerate() {
            let prefix = format!("items[{index}]");
            push_item_params(&mut params, &prefix, item);
        }
        for (index, item) in request.one_time_items.iter().enumerate() {
            let prefix = format!("add_invoice_items[{index}]");
            push_item_params(&mut params, &prefix, item);
        }
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }
        let body = self
            .send(
                self.request(Method::POST, "/v1/subscriptions")
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&params),
            )
            .await?;
        Ok(parse_subscription(&body))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ExternalSubscription, ProviderError> {
        let body = self
            .send(self.request(Method::GET, &format!("/v1/subscriptions/{subscription_id}")))
            .await?;
        Ok(parse_subscription(&body))
    }

    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ExternalSubscription, ProviderError> {
        let params: Vec<(String, String)> = metadata
            .iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value.clone()))
            .collect();
        let body = self
            .send(
                self.request(Method::POST, &format!("/v1/subscriptions/{subscription_id}"))
                    .form(&params),
            )
            .await?;
        Ok(parse_subscription(&body))
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError> {
        let body = self
            .send(
                self.request(Method::GET, &format!("/v1/invoices/{invoice_id}"))
                    .query(&[("expand[]", "payment_intent")]),
            )
            .await?;
        Ok(parse_invoice(&body))
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> Result<ExternalInvoice, ProviderError> {
        let params = [
            ("auto_advance", "true"),
            ("expand[]", "payment_intent"),
        ];
        let body = self
            .send(
                self.request(Method::POST, &format!("/v1/invoices/{invoice_id}/finalize"))
                    .form(&params),
            )
            .await?;
        Ok(parse_invoice(&body))
    }

    async fn retrieve_setup_intent(
        &self,
        setup_intent_id: &str,
    ) -> Result<ExternalSetupIntent, ProviderError> {
        let body = self
            .send(self.request(Method::GET, &format!("/v1/setup_intents/{setup_intent_id}")))
            .await?;
        Ok(ExternalSetupIntent {
            id: jstr(&body, &["id"]).unwrap_or_default().to_string(),
            client_secret: jstr(&body, &["client_secret"]).map(str::to_string),
        })
    }
}

fn push_item_params(params: &mut Vec<(String, String)>, prefix: &str, item: &PricedLineItem) {
    if item.quantity != 1 {
        params.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }
    if let Some(price_id) = &item.external_price_id {
        params.push((format!("{prefix}[price]"), price_id.clone()));
        return;
    }
    // Synthesized item (annualized plan/add-on price or extra seats): the
    // provider has no catalog row for it, so pricing goes inline.
    params.push((
        format!("{prefix}[price_data][currency]"),
        item.currency.clone(),
    ));
    params.push((
        format!("{prefix}[price_data][unit_amount]"),
        item.unit_amount.to_string(),
    ));
    if let Some(product_id) = &item.external_product_id {
        params.push((format!("{prefix}[price_data][product]"), product_id.clone()));
    }
    if let Some(interval) = item.interval {
        params.push((
            format!("{prefix}[price_data][recurring][interval]"),
            interval.provider_interval().to_string(),
        ));
    }
}

// Small helper: nested json lookup.
fn jget<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    Some(current)
}

fn jstr<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(value, path)?.as_str()
}

/// Accept either a bare id string or an expanded object carrying an `id`.
fn jref(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(id) => Some(id.clone()),
        object @ Value::Object(_) => jstr(object, &["id"]).map(str::to_string),
        _ => None,
    }
}

fn parse_subscription(body: &Value) -> ExternalSubscription {
    let metadata = jget(body, &["metadata"])
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let items = jget(body, &["items", "data"])
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|item| {
                    Some(ExternalLineItem {
                        price_id: jstr(item, &["price", "id"])?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    ExternalSubscription {
        id: jstr(body, &["id"]).unwrap_or_default().to_string(),
        status: jstr(body, &["status"]).unwrap_or_default().to_string(),
        metadata,
        items,
        latest_invoice: jref(body, "latest_invoice"),
        pending_setup_intent: jref(body, "pending_setup_intent"),
    }
}

fn parse_invoice(body: &Value) -> ExternalInvoice {
    ExternalInvoice {
        id: jstr(body, &["id"]).unwrap_or_default().to_string(),
        status: jstr(body, &["status"]).unwrap_or_default().to_string(),
        payment_intent_id: jref(body, "payment_intent"),
        confirmation_secret: jstr(body, &["payment_intent", "client_secret"]).map(str::to_string),
    }
}
