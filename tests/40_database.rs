use anyhow::Result;
use sqlx::{pool::PoolConnection, postgres::PgPoolOptions, PgPool, Postgres};
use uuid::Uuid;

use stagecraft::auth::AuthUser;
use stagecraft::database::models::{DataGroup, OAuthUser};
use stagecraft::database::{finish, DatabaseError};
use stagecraft::handlers::resource::{list_models, Params};

/// Migrated pool for this test, or `None` when no database is configured or reachable
async fn database() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = match PgPoolOptions::new().max_connections(2).connect(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("skipping, database unavailable: {}", e);
            return None;
        }
    };
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

async fn count(conn: &mut PoolConnection<Postgres>, sql: &str, id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).bind(id).fetch_one(&mut **conn).await?)
}

#[tokio::test]
async fn expired_cached_token_is_deleted_on_lookup() -> Result<()> {
    let Some(pool) = database().await else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;
    let user = AuthUser {
        uid: "cache-uid".to_string(),
        email: "cached@example.gov.uk".to_string(),
        name: None,
        organisation_slug: None,
        permissions: vec!["signin".to_string()],
    };
    let expired = format!("expired-{}", Uuid::new_v4());
    let fresh = format!("fresh-{}", Uuid::new_v4());
    OAuthUser::cache_user(&mut conn, &expired, &user, -5).await?;
    OAuthUser::cache_user(&mut conn, &fresh, &user, 5).await?;

    assert!(OAuthUser::get_by_access_token(&mut conn, &expired).await?.is_none());
    let rows = count(&mut conn, "SELECT COUNT(*) FROM oauth_users WHERE access_token = $1", &expired).await?;
    assert_eq!(rows, 0);

    let cached = OAuthUser::get_by_access_token(&mut conn, &fresh).await?;
    assert_eq!(cached.map(|u| u.email), Some("cached@example.gov.uk".to_string()));

    sqlx::query("DELETE FROM oauth_users WHERE access_token = $1").bind(&fresh).execute(&mut *conn).await?;
    Ok(())
}

#[tokio::test]
async fn failed_write_is_rolled_back() -> Result<()> {
    let Some(pool) = database().await else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;
    let mut group = DataGroup::new();
    group.name = format!("rollback-{}", Uuid::new_v4().simple());

    let mut tx = pool.begin().await?;
    let result = match group.save(&mut tx).await {
        Ok(()) => Err(DatabaseError::NotFound("later step failed".to_string())),
        Err(e) => Err(e),
    };
    let outcome: Result<(), DatabaseError> = finish(tx, result).await;
    assert!(outcome.is_err());

    let rows = count(&mut conn, "SELECT COUNT(*) FROM data_groups WHERE name = $1", &group.name).await?;
    assert_eq!(rows, 0);
    Ok(())
}

#[tokio::test]
async fn lists_keep_creation_order() -> Result<()> {
    let Some(pool) = database().await else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;
    let prefix = format!("order-{}", Uuid::new_v4().simple());
    let names: Vec<String> = ["zulu", "alpha", "mike"].iter().map(|n| format!("{}-{}", prefix, n)).collect();

    let mut tx = pool.begin().await?;
    let mut result = Ok(());
    for name in &names {
        let mut group = DataGroup::new();
        group.name = name.clone();
        if let Err(e) = group.save(&mut tx).await {
            result = Err(e);
            break;
        }
    }
    finish(tx, result).await?;

    let listed = list_models::<DataGroup>(&mut conn, &Params::new(), None)
        .await
        .map_err(|e| anyhow::anyhow!(e.message().to_string()))?;
    let ours: Vec<String> = listed.into_iter().map(|g| g.name).filter(|n| n.starts_with(&prefix)).collect();
    assert_eq!(ours, names);

    sqlx::query("DELETE FROM data_groups WHERE name LIKE $1")
        .bind(format!("{}%", prefix))
        .execute(&mut *conn)
        .await?;
    Ok(())
}
