use sqlx::{self, postgres::PgRow, FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::query_builder::QueryBuilder;
use crate::filter::{Filter, OwnerTable};

/// Table-scoped reads shared by every model
pub struct Repository<T> {
    table_name: &'static str,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    pub fn new(table_name: &'static str) -> Self {
        Self {
            table_name,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Fresh filter over this table
    pub fn filter(&self) -> Result<Filter, DatabaseError> {
        Filter::new(self.table_name).map_err(|e| DatabaseError::QueryError(e.to_string()))
    }

    pub async fn select_any(&self, conn: &mut PgConnection, filter: Filter) -> Result<Vec<T>, DatabaseError> {
        QueryBuilder::<T>::new(filter).select_all(conn).await
    }

    pub async fn select_one(&self, conn: &mut PgConnection, filter: Filter) -> Result<Option<T>, DatabaseError> {
        QueryBuilder::<T>::new(filter).select_optional(conn).await
    }

    pub async fn count(&self, conn: &mut PgConnection) -> Result<i64, DatabaseError> {
        QueryBuilder::<T>::new(self.filter()?).count(conn).await
    }

    pub async fn find(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<T>, DatabaseError> {
        let query = format!("SELECT * FROM \"{}\" WHERE \"id\" = $1", self.table_name);
        let row = sqlx::query_as::<_, T>(&query).bind(id).fetch_optional(&mut *conn).await?;
        Ok(row)
    }

    pub async fn find_404(&self, conn: &mut PgConnection, id: Uuid, what: &str) -> Result<T, DatabaseError> {
        self.find(conn, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} with id {} not found", what, id)))
    }

    /// Exact match on a text column
    pub async fn find_by(&self, conn: &mut PgConnection, column: &str, value: &str) -> Result<Option<T>, DatabaseError> {
        let mut filter = self.filter()?;
        filter
            .where_eq(column, serde_json::Value::String(value.to_string()))
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        self.select_one(conn, filter).await
    }

    pub async fn delete(&self, conn: &mut PgConnection, id: Uuid) -> Result<u64, DatabaseError> {
        let query = format!("DELETE FROM \"{}\" WHERE \"id\" = $1", self.table_name);
        let result = sqlx::query(&query).bind(id).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}

/// Id of the user with `email`, creating the user when missing
pub async fn get_or_create_user(conn: &mut PgConnection, email: &str) -> Result<Uuid, DatabaseError> {
    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE lower(email) = lower($1)")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (id, email) VALUES ($1, $2)
         ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn add_owner(conn: &mut PgConnection, owners: OwnerTable, id: Uuid, email: &str) -> Result<(), DatabaseError> {
    let user_id = get_or_create_user(conn, email).await?;
    let query = format!(
        "INSERT INTO \"{}\" (\"{}\", user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        owners.table, owners.column
    );
    sqlx::query(&query).bind(id).bind(user_id).execute(&mut *conn).await?;
    Ok(())
}

pub async fn is_owner(conn: &mut PgConnection, owners: OwnerTable, id: Uuid, email: &str) -> Result<bool, DatabaseError> {
    let query = format!(
        "SELECT EXISTS (
            SELECT 1 FROM \"{}\" o JOIN users u ON u.id = o.user_id
            WHERE o.\"{}\" = $1 AND lower(u.email) = lower($2)
         )",
        owners.table, owners.column
    );
    let exists: bool = sqlx::query_scalar(&query).bind(id).bind(email).fetch_one(&mut *conn).await?;
    Ok(exists)
}

pub async fn owner_emails(conn: &mut PgConnection, owners: OwnerTable, id: Uuid) -> Result<Vec<String>, DatabaseError> {
    let query = format!(
        "SELECT u.email FROM \"{}\" o JOIN users u ON u.id = o.user_id
         WHERE o.\"{}\" = $1 ORDER BY u.email",
        owners.table, owners.column
    );
    let emails: Vec<String> = sqlx::query_scalar(&query).bind(id).fetch_all(&mut *conn).await?;
    Ok(emails)
}
