use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{AddOnCharge, BillingPeriod, PlanAddOn, PlanOption, PlanPrice, PlanSnapshot};

/// key: billing-catalog -> read-only plan/price/add-on lookup
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_plans(&self) -> AppResult<Vec<PlanOption>> {
        let rows = sqlx::query_as::<_, PlanRow>(
            "SELECT * FROM billing_plans WHERE active = TRUE ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PlanOption::from).collect())
    }

    pub async fn load_plan(&self, plan_id: Uuid) -> AppResult<PlanSnapshot> {
        let plan = sqlx::query_as::<_, PlanRow>(
            "SELECT * FROM billing_plans WHERE id = $1 AND active = TRUE",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("plan {plan_id} does not exist")))?;

        let prices = sqlx::query_as::<_, PriceRow>(
            "SELECT * FROM billing_plan_prices WHERE plan_id = $1 ORDER BY interval ASC",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        let addons = sqlx::query_as::<_, AddOnRow>(
            "SELECT * FROM billing_plan_addons WHERE plan_id = $1 ORDER BY addon_id ASC",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(PlanSnapshot {
            plan: plan.into(),
            prices: prices
                .into_iter()
                .map(PlanPrice::try_from)
                .collect::<AppResult<Vec<_>>>()?,
            addons: addons
                .into_iter()
                .map(PlanAddOn::try_from)
                .collect::<AppResult<Vec<_>>>()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlanRow {
    id: Uuid,
    tier_id: Uuid,
    code: String,
    name: String,
    external_product_id: String,
    extra_seat_unit_amount: Option<i64>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PlanRow> for PlanOption {
    fn from(row: PlanRow) -> Self {
        PlanOption {
            id: row.id,
            tier_id: row.tier_id,
            code: row.code,
            name: row.name,
            external_product_id: row.external_product_id,
            extra_seat_unit_amount: row.extra_seat_unit_amount,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PriceRow {
    id: Uuid,
    plan_id: Uuid,
    interval: String,
    unit_amount: i64,
    currency: String,
    external_price_id: String,
}

impl TryFrom<PriceRow> for PlanPrice {
    type Error = AppError;

    fn try_from(row: PriceRow) -> AppResult<Self> {
        let interval = BillingPeriod::parse(&row.interval).ok_or_else(|| {
            AppError::Message(format!(
                "catalog price {} has unknown interval {:?}",
                row.id, row.interval
            ))
        })?;
        Ok(PlanPrice {
            id: row.id,
            plan_id: row.plan_id,
            interval,
            unit_amount: row.unit_amount,
            currency: row.currency,
            external_price_id: row.external_price_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct AddOnRow {
    plan_id: Uuid,
    addon_id: Uuid,
    code: String,
    included: bool,
    charge_type: String,
    interval: Option<String>,
    unit_amount: i64,
    currency: String,
    external_price_id: String,
    external_product_id: String,
}

impl TryFrom<AddOnRow> for PlanAddOn {
    type Error = AppError;

    fn try_from(row: AddOnRow) -> AppResult<Self> {
        let charge = match row.charge_type.as_str() {
            "one_time" => AddOnCharge::OneTime,
            "recurring" => {
                let interval = row
                    .interval
                    .as_deref()
                    .and_then(BillingPeriod::parse)
                    .ok_or_else(|| {
                        AppError::Message(format!(
                            "recurring add-on {} on plan {} has no valid interval",
                            row.addon_id, row.plan_id
                        ))
                    })?;
                AddOnCharge::Recurring(interval)
            }
            other => {
                return Err(AppError::Message(format!(
                    "add-on {} on plan {} has unknown charge type {other:?}",
                    row.addon_id, row.plan_id
                )))
            }
        };
        Ok(PlanAddOn {
            plan_id: row.plan_id,
            addon_id: row.addon_id,
            code: row.code,
            included: row.included,
            charge,
            unit_amount: row.unit_amount,
            currency: row.currency,
            external_price_id: row.external_price_id,
            external_product_id: row.external_product_id,
        })
    }
}
