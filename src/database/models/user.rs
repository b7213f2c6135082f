use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

impl User {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), email: String::new() }
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO users (id, email) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email",
        )
        .bind(self.id)
        .bind(&self.email)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<serde_json::Value, DatabaseError> {
        let data_sets = self.data_set_names(conn).await?;
        Ok(serde_json::json!({ "email": self.email, "data_sets": data_sets }))
    }

    /// Names of the data sets this user owns
    pub async fn data_set_names(&self, conn: &mut PgConnection) -> Result<Vec<String>, DatabaseError> {
        let names = sqlx::query_scalar(
            "SELECT ds.name FROM data_sets ds
             JOIN data_set_owners o ON o.data_set_id = ds.id
             WHERE o.user_id = $1 ORDER BY ds.name",
        )
        .bind(self.id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(names)
    }
}

/// Signon identity cached against its access token
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OAuthUser {
    pub id: Uuid,
    pub access_token: String,
    pub uid: String,
    pub email: String,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl OAuthUser {
    /// Unexpired cache entry for `access_token`; an expired entry is deleted
    pub async fn get_by_access_token(conn: &mut PgConnection, access_token: &str) -> Result<Option<OAuthUser>, DatabaseError> {
        sqlx::query("DELETE FROM oauth_users WHERE access_token = $1 AND expires_at <= now()")
            .bind(access_token)
            .execute(&mut *conn)
            .await?;
        let row = sqlx::query_as::<_, OAuthUser>(
            "SELECT * FROM oauth_users WHERE access_token = $1 AND expires_at > now()",
        )
        .bind(access_token)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn cache_user(
        conn: &mut PgConnection,
        access_token: &str,
        user: &AuthUser,
        ttl_minutes: i64,
    ) -> Result<(), DatabaseError> {
        let expires_at = Utc::now() + Duration::minutes(ttl_minutes);
        sqlx::query(
            "INSERT INTO oauth_users (id, access_token, uid, email, permissions, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (access_token) DO UPDATE SET
               uid = EXCLUDED.uid,
               email = EXCLUDED.email,
               permissions = EXCLUDED.permissions,
               expires_at = EXCLUDED.expires_at",
        )
        .bind(Uuid::new_v4())
        .bind(access_token)
        .bind(&user.uid)
        .bind(&user.email)
        .bind(&user.permissions)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Drop every cached token for the signon user `uid`
    pub async fn purge_user(conn: &mut PgConnection, uid: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM oauth_users WHERE uid = $1")
            .bind(uid)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn into_auth_user(self) -> AuthUser {
        AuthUser {
            uid: self.uid,
            email: self.email,
            name: None,
            organisation_slug: None,
            permissions: self.permissions,
        }
    }
}
