use once_cell::sync::Lazy;

/// Secret key presented to the payment provider. Must be set via the
/// `PAYMENT_PROVIDER_SECRET` env variable.
pub static PAYMENT_PROVIDER_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYMENT_PROVIDER_SECRET").expect("PAYMENT_PROVIDER_SECRET must be set")
});

/// Base URL of the payment provider REST API. Defaults to the Stripe API.
pub static PAYMENT_PROVIDER_BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYMENT_PROVIDER_BASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// Per-request timeout for provider calls, in seconds. Defaults to `30`.
pub static PAYMENT_PROVIDER_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PAYMENT_PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30)
});

/// key: billing-config -> confirmation extraction retry budget
pub static CONFIRMATION_RETRY_ATTEMPTS: Lazy<u32> = Lazy::new(|| {
    std::env::var("CONFIRMATION_RETRY_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// key: billing-config -> pause between confirmation attempts (milliseconds)
pub static CONFIRMATION_RETRY_BACKOFF_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("CONFIRMATION_RETRY_BACKOFF_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(750)
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});
