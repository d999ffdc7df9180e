use sqlx::PgPool;
use uuid::Uuid;

use billing_backend::billing::{
    AddOnCharge, BillingPeriod, IntentKind, PgRecordStore, PlanCatalog, ProvisioningRecord,
    ProvisioningRecordStore,
};
use billing_backend::error::AppError;

async fn seed_company(pool: &PgPool) -> Uuid {
    let company_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO onboarding_records (company_id, provider_customer_id) VALUES ($1, $2)",
    )
    .bind(company_id)
    .bind(format!("cus_{company_id}"))
    .execute(pool)
    .await
    .unwrap();
    company_id
}

fn record(period: BillingPeriod, selection_hash: &str) -> ProvisioningRecord {
    ProvisioningRecord {
        intent_id: "pi_1".to_string(),
        intent_type: IntentKind::Payment,
        client_secret: "pi_1_secret".to_string(),
        external_subscription_id: "sub_1".to_string(),
        amount: 5000,
        currency: "eur".to_string(),
        period,
        selection_hash: selection_hash.to_string(),
    }
}

// key: billing-tests -> provisioning record persistence
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn record_round_trips_under_the_period_key(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool).await;
    let store = PgRecordStore::new(pool.clone());

    assert!(store
        .load(company_id, BillingPeriod::Monthly)
        .await
        .unwrap()
        .is_none());

    store
        .save(company_id, BillingPeriod::Monthly, &record(BillingPeriod::Monthly, "hash_a"))
        .await
        .unwrap();

    let loaded = store
        .load(company_id, BillingPeriod::Monthly)
        .await
        .unwrap()
        .expect("record stored");
    assert_eq!(loaded.selection_hash, "hash_a");
    assert_eq!(loaded.external_subscription_id, "sub_1");

    // The record lives under the documented metadata key, next to whatever
    // the wizard keeps there.
    let raw: serde_json::Value = sqlx::query_scalar(
        "SELECT metadata FROM onboarding_records WHERE company_id = $1",
    )
    .bind(company_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(raw.get("monthly_intent").is_some());
    assert!(raw.get("yearly_intent").is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn save_overwrites_and_clear_removes_both_periods(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool).await;
    let store = PgRecordStore::new(pool.clone());

    store
        .save(company_id, BillingPeriod::Monthly, &record(BillingPeriod::Monthly, "hash_a"))
        .await
        .unwrap();
    store
        .save(company_id, BillingPeriod::Monthly, &record(BillingPeriod::Monthly, "hash_b"))
        .await
        .unwrap();
    store
        .save(company_id, BillingPeriod::Yearly, &record(BillingPeriod::Yearly, "hash_y"))
        .await
        .unwrap();

    let monthly = store
        .load(company_id, BillingPeriod::Monthly)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monthly.selection_hash, "hash_b");

    store.clear(company_id).await.unwrap();
    assert!(store
        .load(company_id, BillingPeriod::Monthly)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .load(company_id, BillingPeriod::Yearly)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_company_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgRecordStore::new(pool);

    let err = store.customer_context(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = store
        .save(
            Uuid::new_v4(),
            BillingPeriod::Monthly,
            &record(BillingPeriod::Monthly, "hash_a"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// key: billing-tests -> catalog snapshot loading
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn catalog_loads_plan_prices_and_addons(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let plan_id = Uuid::new_v4();
    let tier_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_plans (id, tier_id, code, name, external_product_id, extra_seat_unit_amount) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(plan_id)
    .bind(tier_id)
    .bind("core")
    .bind("Core")
    .bind("prod_core")
    .bind(500_i64)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO billing_plan_prices (id, plan_id, interval, unit_amount, currency, external_price_id) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(plan_id)
    .bind("monthly")
    .bind(5000_i64)
    .bind("eur")
    .bind("price_core_m")
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO billing_plan_addons (plan_id, addon_id, code, included, charge_type, interval, unit_amount, currency, external_price_id, external_product_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(plan_id)
    .bind(Uuid::new_v4())
    .bind("website")
    .bind(false)
    .bind("recurring")
    .bind("monthly")
    .bind(900_i64)
    .bind("eur")
    .bind("price_website_m")
    .bind("prod_website")
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO billing_plan_addons (plan_id, addon_id, code, included, charge_type, interval, unit_amount, currency, external_price_id, external_product_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(plan_id)
    .bind(Uuid::new_v4())
    .bind("setup")
    .bind(true)
    .bind("one_time")
    .bind(Option::<String>::None)
    .bind(1000_i64)
    .bind("eur")
    .bind("price_setup")
    .bind("prod_setup")
    .execute(&pool)
    .await
    .unwrap();

    let catalog = PlanCatalog::new(pool.clone());
    let snapshot = catalog.load_plan(plan_id).await.unwrap();
    assert_eq!(snapshot.plan.code, "core");
    assert_eq!(snapshot.plan.extra_seat_unit_amount, Some(500));
    assert_eq!(snapshot.prices.len(), 1);
    assert_eq!(snapshot.prices[0].interval, BillingPeriod::Monthly);
    assert_eq!(snapshot.addons.len(), 2);
    let setup = snapshot
        .addons
        .iter()
        .find(|a| a.code == "setup")
        .unwrap();
    assert!(setup.included);
    assert_eq!(setup.charge, AddOnCharge::OneTime);

    let err = catalog.load_plan(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let plans = catalog.list_plans().await.unwrap();
    assert_eq!(plans.len(), 1);
}
