use super::models::Role;
use super::{Store, StoreContext, StoreError};
use sqlx::Row;
use uuid::Uuid;

const NAME_CONSTRAINT: &str = "roles_resource_id_name_key";
const ID_CONSTRAINT: &str = "roles_pkey";

impl Store {
    pub async fn create_role(
        &self,
        ctx: &mut StoreContext,
        id: Uuid,
        name: &str,
        resource_id: &str,
        created_by: &str,
    ) -> Result<Role, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (id, name, resource_id, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4, now(), now())
            RETURNING id, name, resource_id, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(resource_id)
        .bind(created_by)
        .fetch_one(&mut *ctx.tx)
        .await
        .map_err(|e| StoreError::from_insert_error(e, NAME_CONSTRAINT, ID_CONSTRAINT))?;

        Ok(row_to_role(row))
    }

    pub async fn get_role(&self, id: Uuid) -> Result<Role, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, resource_id, created_by, updated_by, created_at, updated_at
            FROM roles WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_role).ok_or(StoreError::NotFound)
    }

    pub async fn list_roles(&self, resource_id: &str) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, resource_id, created_by, updated_by, created_at, updated_at
            FROM roles WHERE resource_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_role).collect())
    }

    pub async fn update_role(
        &self,
        ctx: &mut StoreContext,
        id: Uuid,
        new_name: Option<&str>,
        updated_by: &str,
    ) -> Result<Role, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE roles
            SET name = COALESCE($2, name), updated_by = $3, updated_at = now()
            WHERE id = $1
            RETURNING id, name, resource_id, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(new_name)
        .bind(updated_by)
        .fetch_optional(&mut *ctx.tx)
        .await
        .map_err(|e| StoreError::from_insert_error(e, NAME_CONSTRAINT, ID_CONSTRAINT))?;

        row.map(row_to_role).ok_or(StoreError::NotFound)
    }

    pub async fn delete_role(&self, ctx: &mut StoreContext, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&mut *ctx.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_role(row: sqlx::postgres::PgRow) -> Role {
    Role {
        id: row.get("id"),
        name: row.get("name"),
        resource_id: row.get("resource_id"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
