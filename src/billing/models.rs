use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// key: billing-period -> subscription recurrence interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingPeriod::Monthly),
            "yearly" => Some(BillingPeriod::Yearly),
            _ => None,
        }
    }

    /// Factor applied to monthly-denominated prices to express them at this
    /// period. Never used in the other direction.
    pub fn multiplier(&self) -> i64 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Yearly => 12,
        }
    }

    /// Key under which the provisioning record lives in the onboarding
    /// record's metadata object.
    pub fn record_key(&self) -> String {
        format!("{}_intent", self.as_str())
    }

    /// Interval name the payment provider understands (`month` / `year`).
    pub fn provider_interval(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "month",
            BillingPeriod::Yearly => "year",
        }
    }
}

/// key: billing-catalog-plan -> sellable plan option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOption {
    pub id: Uuid,
    pub tier_id: Uuid,
    pub code: String,
    pub name: String,
    pub external_product_id: String,
    pub extra_seat_unit_amount: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: billing-catalog-price -> per-interval plan price (minor units)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPrice {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub interval: BillingPeriod,
    pub unit_amount: i64,
    pub currency: String,
    pub external_price_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOnCharge {
    Recurring(BillingPeriod),
    OneTime,
}

/// key: billing-catalog-addon -> per-plan add-on pricing and inclusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAddOn {
    pub plan_id: Uuid,
    pub addon_id: Uuid,
    pub code: String,
    pub included: bool,
    pub charge: AddOnCharge,
    pub unit_amount: i64,
    pub currency: String,
    pub external_price_id: String,
    pub external_product_id: String,
}

/// Everything the catalog knows about one plan.
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    pub plan: PlanOption,
    pub prices: Vec<PlanPrice>,
    pub addons: Vec<PlanAddOn>,
}

/// Raw client-submitted selection, unvalidated.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSelection {
    pub plan_id: Uuid,
    #[serde(default)]
    pub tier_id: Option<Uuid>,
    #[serde(default)]
    pub website: bool,
    #[serde(default)]
    pub extra_seats: u32,
    #[serde(default)]
    pub addon_ids: Vec<Uuid>,
}

/// Validated, normalized selection. Ephemeral; derived on every call.
#[derive(Debug, Clone)]
pub struct Selection {
    pub plan: PlanOption,
    pub prices: Vec<PlanPrice>,
    /// Explicitly chosen add-ons plus plan-included ones, deduplicated and
    /// sorted by add-on id.
    pub enabled_addons: Vec<PlanAddOn>,
    pub extra_seats: u32,
    pub website_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Plan,
    Addon,
    ExtraSeats,
}

/// key: billing-line-item -> one priced component of a selection
#[derive(Debug, Clone, Serialize)]
pub struct PricedLineItem {
    pub kind: LineItemKind,
    pub recurring: bool,
    pub unit_amount: i64,
    pub quantity: u64,
    pub currency: String,
    pub addon_id: Option<Uuid>,
    /// Set when a native catalog price is used unmodified; synthesized
    /// (annualized or seat) items carry inline pricing instead.
    pub external_price_id: Option<String>,
    pub external_product_id: Option<String>,
    pub interval: Option<BillingPeriod>,
    pub synthesized: bool,
}

impl PricedLineItem {
    pub fn amount(&self) -> i64 {
        self.unit_amount * self.quantity as i64
    }
}

/// key: billing-composition -> priced line items plus totals, one currency
#[derive(Debug, Clone, Serialize)]
pub struct PriceComposition {
    /// The `PlanPrice` row the plan line item was derived from (the monthly
    /// row when a yearly amount was synthesized).
    pub plan_price_id: Uuid,
    pub items: Vec<PricedLineItem>,
    pub recurring_total: i64,
    pub one_time_total: i64,
    pub total: i64,
    pub currency: String,
}

impl PriceComposition {
    pub fn plan_item(&self) -> Option<&PricedLineItem> {
        self.items.iter().find(|item| item.kind == LineItemKind::Plan)
    }
}

/// Deterministic identity of a logical selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionFingerprint {
    pub selection_hash: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Payment,
    Setup,
}

/// key: billing-provisioning-record -> per-period outcome cached on the
/// onboarding record (metadata key `"<period>_intent"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub intent_id: String,
    pub intent_type: IntentKind,
    pub client_secret: String,
    pub external_subscription_id: String,
    pub amount: i64,
    pub currency: String,
    pub period: BillingPeriod,
    pub selection_hash: String,
}

/// What the caller gets back from a successful provisioning call.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningOutcome {
    pub intent_id: String,
    pub intent_type: IntentKind,
    pub client_secret: String,
}

/// Caller-supplied identity of the company being provisioned.
#[derive(Debug, Clone)]
pub struct CustomerContext {
    pub company_id: Uuid,
    pub provider_customer_id: String,
}
