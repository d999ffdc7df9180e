pub mod api;
pub mod catalog;
pub mod confirmation;
pub mod fingerprint;
pub mod models;
pub mod pricing;
pub mod provider;
pub mod provisioner;
pub mod records;
pub mod selection;

pub use api::{
    list_plans as billing_list_plans, provision_subscription as billing_provision_subscription,
    quote_selection as billing_quote_selection, ProvisionRequest, QuoteRequest, QuoteResponse,
};
pub use catalog::PlanCatalog;
pub use confirmation::{extract_confirmation, Confirmation, RetryPolicy};
pub use fingerprint::{build_fingerprint, idempotency_key, selection_hash};
pub use models::{
    AddOnCharge, BillingPeriod, CustomerContext, IntentKind, LineItemKind, PlanAddOn, PlanOption,
    PlanPrice, PlanSnapshot, PriceComposition, PricedLineItem, ProvisioningOutcome,
    ProvisioningRecord, RawSelection, Selection, SelectionFingerprint,
};
pub use pricing::{compose_prices, ONE_TIME_ITEM_CAP};
pub use provider::{
    CreateSubscriptionRequest, ExternalInvoice, ExternalLineItem, ExternalSetupIntent,
    ExternalSubscription, PaymentProvider, ProviderError, StripeGateway,
};
pub use provisioner::SubscriptionProvisioner;
pub use records::{PgRecordStore, ProvisioningRecordStore};
pub use selection::{resolve_selection, WEBSITE_ADDON_CODE};
