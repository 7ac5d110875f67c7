//! `PostgreSQL` datastore.
//!
//! Feature-gated behind `postgres-backend`. The schema is bootstrapped with
//! `CREATE TABLE IF NOT EXISTS` on connect. Subscription writes are single
//! `INSERT ... ON CONFLICT` statements whose `WHERE` clause mirrors
//! [`Subscription::accepts`], so the monotonicity guard and the write happen
//! atomically under read-committed isolation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    CheckoutOutcome, Permission, Role, Subscription, SubscriptionSnapshot, SubscriptionStatus,
    Tenant, UpsertOutcome, User,
};
use crate::{DirectoryStore, StoreError, SubscriptionStore, TenantStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tenants (\
        id                   UUID        PRIMARY KEY, \
        slug                 TEXT        NOT NULL UNIQUE, \
        name                 TEXT        NOT NULL, \
        external_customer_id TEXT        UNIQUE, \
        created_at           TIMESTAMPTZ NOT NULL DEFAULT now()\
    )",
    "CREATE TABLE IF NOT EXISTS roles (\
        id          UUID   PRIMARY KEY, \
        name        TEXT   NOT NULL, \
        tenant_id   UUID   REFERENCES tenants (id), \
        permissions TEXT[] NOT NULL DEFAULT '{}'\
    )",
    "CREATE TABLE IF NOT EXISTS users (\
        id        UUID PRIMARY KEY, \
        email     TEXT NOT NULL UNIQUE, \
        tenant_id UUID NOT NULL REFERENCES tenants (id), \
        role_id   UUID\
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (\
        id                       UUID        PRIMARY KEY, \
        tenant_id                UUID        NOT NULL REFERENCES tenants (id), \
        external_subscription_id TEXT        NOT NULL UNIQUE, \
        external_customer_id     TEXT        NOT NULL, \
        external_price_id        TEXT, \
        status                   TEXT        NOT NULL, \
        current_period_start     TIMESTAMPTZ NOT NULL, \
        current_period_end       TIMESTAMPTZ NOT NULL, \
        cancel_at_period_end     BOOLEAN     NOT NULL DEFAULT false, \
        last_event_at            TIMESTAMPTZ NOT NULL, \
        created_at               TIMESTAMPTZ NOT NULL DEFAULT now(), \
        updated_at               TIMESTAMPTZ NOT NULL DEFAULT now()\
    )",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_tenant ON subscriptions (tenant_id)",
];

/// Upsert keyed by `external_subscription_id`.
///
/// The `WHERE` on the conflict branch is the SQL form of
/// [`Subscription::accepts`], plus the requirement that the row already
/// belongs to the same tenant. When it filters the update out, `RETURNING`
/// yields no row.
const UPSERT_SUBSCRIPTION: &str = r"
    INSERT INTO subscriptions (
        id, tenant_id, external_subscription_id, external_customer_id, external_price_id,
        status, current_period_start, current_period_end, cancel_at_period_end, last_event_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (external_subscription_id) DO UPDATE SET
        external_customer_id = EXCLUDED.external_customer_id,
        external_price_id    = EXCLUDED.external_price_id,
        status               = EXCLUDED.status,
        current_period_start = EXCLUDED.current_period_start,
        current_period_end   = EXCLUDED.current_period_end,
        cancel_at_period_end = EXCLUDED.cancel_at_period_end,
        last_event_at        = EXCLUDED.last_event_at,
        updated_at           = now()
    WHERE (subscriptions.status NOT IN ('canceled', 'incomplete_expired')
           OR subscriptions.status = EXCLUDED.status)
      AND subscriptions.current_period_end <= EXCLUDED.current_period_end
      AND subscriptions.last_event_at <= EXCLUDED.last_event_at
      AND subscriptions.tenant_id = EXCLUDED.tenant_id
    RETURNING (xmax = 0) AS inserted";

const SUBSCRIPTION_COLUMNS: &str = "id, tenant_id, external_subscription_id, external_customer_id, \
    external_price_id, status, current_period_start, current_period_end, cancel_at_period_end, \
    last_event_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    slug: String,
    name: String,
    external_customer_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            name: row.name,
            external_customer_id: row.external_customer_id,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    tenant_id: Option<Uuid>,
    permissions: Vec<String>,
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let permissions = row
            .permissions
            .iter()
            .map(|key| Permission::parse(key))
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| StoreError::Corrupt {
                entity: "role",
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            tenant_id: row.tenant_id,
            permissions,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    tenant_id: Uuid,
    role_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    tenant_id: Uuid,
    external_subscription_id: String,
    external_customer_id: String,
    external_price_id: Option<String>,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    cancel_at_period_end: bool,
    last_event_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|reason| StoreError::Corrupt {
                entity: "subscription",
                reason,
            })?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            external_subscription_id: row.external_subscription_id,
            external_customer_id: row.external_customer_id,
            external_price_id: row.external_price_id,
            status,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            last_event_at: row.last_event_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn query_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Query {
        operation,
        reason: e.to_string(),
    }
}

fn tx_error(e: sqlx::Error) -> StoreError {
    StoreError::Transaction {
        reason: e.to_string(),
    }
}

/// A datastore backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresStore {
    /// Connect to `PostgreSQL` and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection or bootstrap fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: e.to_string(),
            })?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Unavailable {
                    reason: format!("schema bootstrap failed: {e}"),
                })?;
        }

        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_in(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(UPSERT_SUBSCRIPTION)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(&snapshot.external_subscription_id)
            .bind(&snapshot.external_customer_id)
            .bind(snapshot.external_price_id.as_deref())
            .bind(snapshot.status.as_str())
            .bind(snapshot.current_period_start)
            .bind(snapshot.current_period_end)
            .bind(snapshot.cancel_at_period_end)
            .bind(snapshot.observed_at)
            .fetch_optional(&mut **tx)
            .await
            .map_err(query_error("upsert subscription"))?;

        match row {
            Some((true,)) => Ok(UpsertOutcome::Inserted),
            Some((false,)) => Ok(UpsertOutcome::Updated),
            None => Self::skipped(tx, tenant_id, snapshot).await,
        }
    }

    /// Classify an upsert that the conflict guard filtered out.
    async fn skipped(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        let owner: Option<(Uuid,)> =
            sqlx::query_as("SELECT tenant_id FROM subscriptions WHERE external_subscription_id = $1")
                .bind(&snapshot.external_subscription_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(query_error("subscription owner"))?;

        match owner {
            Some((owner,)) if owner != tenant_id => {
                warn!(
                    subscription_id = %snapshot.external_subscription_id,
                    %owner,
                    %tenant_id,
                    "subscription belongs to another tenant; not updated"
                );
                Ok(UpsertOutcome::TenantConflict)
            }
            _ => {
                debug!(
                    subscription_id = %snapshot.external_subscription_id,
                    observed_at = %snapshot.observed_at,
                    "skipped stale subscription snapshot"
                );
                Ok(UpsertOutcome::Stale)
            }
        }
    }
}

#[async_trait::async_trait]
impl TenantStore for PostgresStore {
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("tenant by slug"))?;
        Ok(row.map(Tenant::from))
    }

    async fn tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("tenant by id"))?;
        Ok(row.map(Tenant::from))
    }

    async fn tenant_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT * FROM tenants WHERE external_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("tenant by customer id"))?;
        Ok(row.map(Tenant::from))
    }
}

#[async_trait::async_trait]
impl DirectoryStore for PostgresStore {
    async fn user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("user by id"))?;

        Ok(row.map(|u| User {
            id: u.id,
            email: u.email,
            tenant_id: u.tenant_id,
            role_id: u.role_id,
        }))
    }

    async fn role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("role by id"))?
            .map(Role::try_from)
            .transpose()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for PostgresStore {
    async fn subscriptions_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("subscription by id"))?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn record_checkout(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<CheckoutOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(tx_error)?;

        // Locks the tenant row for the rest of the transaction.
        let existing: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT external_customer_id FROM tenants WHERE id = $1 FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error("lock tenant"))?;

        let Some((current_customer,)) = existing else {
            return Err(StoreError::NotFound {
                entity: "tenant",
                key: tenant_id.to_string(),
            });
        };

        let customer_id_conflict = match current_customer.as_deref() {
            None => {
                sqlx::query("UPDATE tenants SET external_customer_id = $2 WHERE id = $1")
                    .bind(tenant_id)
                    .bind(&snapshot.external_customer_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_error("set tenant customer id"))?;
                false
            }
            Some(existing) => existing != snapshot.external_customer_id,
        };

        let subscription = Self::upsert_in(&mut tx, tenant_id, snapshot).await?;

        tx.commit().await.map_err(tx_error)?;

        Ok(CheckoutOutcome {
            subscription,
            customer_id_conflict,
        })
    }

    async fn upsert_subscription(
        &self,
        tenant_id: Uuid,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(tx_error)?;
        let outcome = Self::upsert_in(&mut tx, tenant_id, snapshot).await?;
        tx.commit().await.map_err(tx_error)?;
        Ok(outcome)
    }

    async fn mark_cancel_at_period_end(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Subscription, StoreError> {
        sqlx::query_as::<_, SubscriptionRow>(&format!(
            "UPDATE subscriptions SET cancel_at_period_end = true, \
             last_event_at = GREATEST(last_event_at, now()), updated_at = now() \
             WHERE id = $1 AND tenant_id = $2 RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("mark cancel at period end"))?
        .ok_or_else(|| StoreError::NotFound {
            entity: "subscription",
            key: id.to_string(),
        })
        .and_then(Subscription::try_from)
    }
}
