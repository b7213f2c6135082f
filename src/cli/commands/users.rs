use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::database::models::OAuthUser;
use crate::database::{finish, DatabaseManager};

pub async fn purge_user(uid: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let mut tx = DatabaseManager::begin().await?;
    let result = OAuthUser::purge_user(&mut tx, uid).await;
    let purged = finish(tx, result).await?;
    DatabaseManager::close().await;

    output_success(
        &output_format,
        &format!("Purged {} cached tokens for {}", purged, uid),
        Some(json!({ "uid": uid, "purged": purged })),
    )
}
