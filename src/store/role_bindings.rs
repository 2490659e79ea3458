use super::models::RoleBinding;
use super::{Store, StoreContext, StoreError};
use sqlx::Row;
use uuid::Uuid;

const ID_CONSTRAINT: &str = "rolebindings_pkey";

impl Store {
    pub async fn create_role_binding(
        &self,
        ctx: &mut StoreContext,
        id: Uuid,
        resource_id: &str,
        manager: Option<&str>,
        created_by: &str,
    ) -> Result<RoleBinding, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rolebindings (id, resource_id, manager, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4, now(), now())
            RETURNING id, resource_id, manager, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(resource_id)
        .bind(manager)
        .bind(created_by)
        .fetch_one(&mut *ctx.tx)
        .await
        .map_err(|e| StoreError::from_insert_error(e, "", ID_CONSTRAINT))?;

        Ok(row_to_binding(row))
    }

    pub async fn get_role_binding(&self, id: Uuid) -> Result<RoleBinding, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, resource_id, manager, created_by, updated_by, created_at, updated_at
            FROM rolebindings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_binding).ok_or(StoreError::NotFound)
    }

    /// Acquires `SELECT ... FOR UPDATE` on the row, serializing concurrent
    /// mutators of the same binding for the lifetime of `ctx`.
    pub async fn lock_role_binding_for_update(
        &self,
        ctx: &mut StoreContext,
        id: Uuid,
    ) -> Result<RoleBinding, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, resource_id, manager, created_by, updated_by, created_at, updated_at
            FROM rolebindings WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *ctx.tx)
        .await?;

        row.map(row_to_binding).ok_or(StoreError::NotFound)
    }

    pub async fn list_role_bindings_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, manager, created_by, updated_by, created_at, updated_at
            FROM rolebindings WHERE resource_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_binding).collect())
    }

    /// Lists bindings owned by `manager` at `resource_id`. Distinct bind
    /// placeholders for each parameter — the source this was modeled on
    /// infamously reused one placeholder for both (see DESIGN.md).
    pub async fn list_manager_resource_role_bindings(
        &self,
        manager: &str,
        resource_id: &str,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, manager, created_by, updated_by, created_at, updated_at
            FROM rolebindings WHERE manager = $1 AND resource_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(manager)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_binding).collect())
    }

    pub async fn update_role_binding(
        &self,
        ctx: &mut StoreContext,
        id: Uuid,
        updated_by: &str,
    ) -> Result<RoleBinding, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE rolebindings
            SET updated_by = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, resource_id, manager, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(updated_by)
        .fetch_optional(&mut *ctx.tx)
        .await?;

        row.map(row_to_binding).ok_or(StoreError::NotFound)
    }

    pub async fn delete_role_binding(&self, ctx: &mut StoreContext, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM rolebindings WHERE id = $1")
            .bind(id)
            .execute(&mut *ctx.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_binding(row: sqlx::postgres::PgRow) -> RoleBinding {
    RoleBinding {
        id: row.get("id"),
        resource_id: row.get("resource_id"),
        manager: row.get("manager"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
