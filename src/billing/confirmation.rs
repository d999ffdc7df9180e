use std::time::Duration;

use tracing::debug;

use crate::config;
use crate::error::{AppError, AppResult};

use super::models::IntentKind;
use super::provider::{ExternalSubscription, PaymentProvider};

/// Bounded retry budget for confirmation extraction. Injected rather than
/// hard-coded so tests can run the loop under paused time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config() -> Self {
        Self {
            max_attempts: *config::CONFIRMATION_RETRY_ATTEMPTS,
            backoff: Duration::from_millis(*config::CONFIRMATION_RETRY_BACKOFF_MS),
        }
    }
}

/// Client-presentable artifact that authorizes collecting payment.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub intent_id: String,
    pub intent_type: IntentKind,
    pub client_secret: String,
}

/// key: billing-confirmation -> turn a subscription into a client secret
///
/// The invoice's payment intent wins when it exists; a draft invoice is
/// finalized (auto-advancing) and re-checked, since provider-side
/// finalization may be asynchronous. Once the budget is exhausted the
/// pending setup intent is the fallback, covering zero-total selections.
pub async fn extract_confirmation<P: PaymentProvider + ?Sized>(
    provider: &P,
    subscription: &ExternalSubscription,
    policy: &RetryPolicy,
) -> AppResult<Confirmation> {
    if let Some(invoice_id) = &subscription.latest_invoice {
        for attempt in 1..=policy.max_attempts {
            let invoice = provider.retrieve_invoice(invoice_id).await?;
            if let (Some(intent_id), Some(secret)) =
                (&invoice.payment_intent_id, &invoice.confirmation_secret)
            {
                return Ok(Confirmation {
                    intent_id: intent_id.clone(),
                    intent_type: IntentKind::Payment,
                    client_secret: secret.clone(),
                });
            }
            if invoice.status == "draft" {
                let finalized = provider.finalize_invoice(invoice_id).await?;
                if let (Some(intent_id), Some(secret)) =
                    (&finalized.payment_intent_id, &finalized.confirmation_secret)
                {
                    return Ok(Confirmation {
                        intent_id: intent_id.clone(),
                        intent_type: IntentKind::Payment,
                        client_secret: secret.clone(),
                    });
                }
            }
            if attempt < policy.max_attempts {
                debug!(
                    subscription = %subscription.id,
                    attempt,
                    "payment confirmation not ready, backing off"
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }

    // A fully-included selection can invoice at zero; saving a payment
    // method via the setup intent is then the only confirmation available.
    if let Some(setup_intent_id) = &subscription.pending_setup_intent {
        let intent = provider.retrieve_setup_intent(setup_intent_id).await?;
        if let Some(secret) = intent.client_secret {
            return Ok(Confirmation {
                intent_id: intent.id,
                intent_type: IntentKind::Setup,
                client_secret: secret,
            });
        }
    }

    Err(AppError::ConfirmationUnavailable)
}
