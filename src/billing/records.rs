use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{BillingPeriod, CustomerContext, ProvisioningRecord};

/// key: billing-records -> per-period provisioning outcome persistence
///
/// The record is the local source of truth for "did we already provision
/// this"; the provider stays authoritative for billing state. Writes are
/// last-writer-wins; a lost update only costs a redundant provider
/// round-trip on the next call.
#[async_trait]
pub trait ProvisioningRecordStore: Send + Sync {
    async fn load(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
    ) -> AppResult<Option<ProvisioningRecord>>;

    async fn save(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
        record: &ProvisioningRecord,
    ) -> AppResult<()>;

    /// Drop both period records; called when onboarding is finalized or
    /// abandoned.
    async fn clear(&self, company_id: Uuid) -> AppResult<()>;
}

#[async_trait]
impl<S: ProvisioningRecordStore + ?Sized> ProvisioningRecordStore for std::sync::Arc<S> {
    async fn load(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
    ) -> AppResult<Option<ProvisioningRecord>> {
        (**self).load(company_id, period).await
    }

    async fn save(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
        record: &ProvisioningRecord,
    ) -> AppResult<()> {
        (**self).save(company_id, period, record).await
    }

    async fn clear(&self, company_id: Uuid) -> AppResult<()> {
        (**self).clear(company_id).await
    }
}

/// Postgres-backed store keeping the record as JSON under the onboarding
/// record's `metadata` object, keyed `"<period>_intent"`.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the provider-side customer identity for a company.
    pub async fn customer_context(&self, company_id: Uuid) -> AppResult<CustomerContext> {
        let provider_customer_id: Option<String> = sqlx::query_scalar(
            "SELECT provider_customer_id FROM onboarding_records WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        let provider_customer_id = provider_customer_id.ok_or_else(|| {
            AppError::NotFound(format!("company {company_id} has no onboarding record"))
        })?;

        Ok(CustomerContext {
            company_id,
            provider_customer_id,
        })
    }
}

#[async_trait]
impl ProvisioningRecordStore for PgRecordStore {
    async fn load(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
    ) -> AppResult<Option<ProvisioningRecord>> {
        let value: Option<Option<serde_json::Value>> = sqlx::query_scalar(
            "SELECT metadata -> $2::text FROM onboarding_records WHERE company_id = $1",
        )
        .bind(company_id)
        .bind(period.record_key())
        .fetch_optional(&self.pool)
        .await?;

        match value.flatten() {
            Some(raw) => {
                let record = serde_json::from_value(raw).map_err(|err| {
                    AppError::Message(format!(
                        "stored provisioning record for company {company_id} is malformed: {err}"
                    ))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        company_id: Uuid,
        period: BillingPeriod,
        record: &ProvisioningRecord,
    ) -> AppResult<()> {
        let payload = serde_json::to_value(record).map_err(|err| {
            AppError::Message(format!("failed to serialize provisioning record: {err}"))
        })?;
        let updated = sqlx::query(
            r#"
            UPDATE onboarding_records
            SET metadata = jsonb_set(COALESCE(metadata, '{}'::jsonb), ARRAY[$2::text], $3::jsonb),
                updated_at = NOW()
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .bind(period.record_key())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "company {company_id} has no onboarding record"
            )));
        }
        Ok(())
    }

    async fn clear(&self, company_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE onboarding_records
            SET metadata = (metadata - $2::text) - $3::text,
                updated_at = NOW()
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .bind(BillingPeriod::Monthly.record_key())
        .bind(BillingPeriod::Yearly.record_key())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
