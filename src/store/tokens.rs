use super::models::ZedTokenEntry;
use super::{Store, StoreError};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::Row;

impl Store {
    /// Upserts the latest causality token for `resource_id`, sweeping expired
    /// rows opportunistically so the table doesn't grow unbounded without a
    /// dedicated cron job. Runs in its own (implicit, single-statement)
    /// context — never inside the caller's business transaction, per §4.F.
    pub async fn upsert_zed_token(
        &self,
        resource_id: &str,
        token: &str,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        let expires_at = Utc::now() + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(1));

        sqlx::query(
            r#"
            INSERT INTO zedtokens (resource_id, zedtoken, created_at, expires_at)
            VALUES ($1, $2, now(), $3)
            ON CONFLICT (resource_id) DO UPDATE
            SET zedtoken = EXCLUDED.zedtoken, created_at = now(), expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(resource_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM zedtokens WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the newest unexpired token among `resource_ids`, or `None` if
    /// every row is missing or expired.
    pub async fn get_latest_zed_token(
        &self,
        resource_ids: &[String],
    ) -> Result<Option<ZedTokenEntry>, StoreError> {
        if resource_ids.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            r#"
            SELECT resource_id, zedtoken, created_at, expires_at
            FROM zedtokens
            WHERE resource_id = ANY($1) AND expires_at >= now()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(resource_ids)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ZedTokenEntry {
            resource_id: r.get("resource_id"),
            zedtoken: r.get("zedtoken"),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
        }))
    }
}
