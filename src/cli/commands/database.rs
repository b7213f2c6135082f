use anyhow::Context;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::database::DatabaseManager;

pub async fn migrate(output_format: OutputFormat) -> anyhow::Result<()> {
    DatabaseManager::migrate().await.context("running migrations")?;
    DatabaseManager::close().await;
    output_success(&output_format, "Migrations applied", None)
}
