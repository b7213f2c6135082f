use anyhow::bail;
use serde_json::json;

use crate::cli::utils::{output_empty_collection, output_success};
use crate::cli::OutputFormat;
use crate::database::models::DataSet;
use crate::database::{finish, DatabaseManager, Repository};

pub async fn set_token(
    token: &str,
    data_group: Option<&str>,
    data_type: Option<&str>,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    if data_group.is_none() && data_type.is_none() {
        bail!("Please provide a data type or data group name to match against, see --help");
    }

    let mut tx = DatabaseManager::begin().await?;
    let result = DataSet::set_token(&mut tx, token, data_group, data_type).await;
    let updated = finish(tx, result).await?;
    DatabaseManager::close().await;

    output_success(
        &output_format,
        &format!("Updated {} records", updated),
        Some(json!({ "updated": updated })),
    )
}

pub async fn list(output_format: OutputFormat) -> anyhow::Result<()> {
    let mut conn = DatabaseManager::pool()?.acquire().await?;
    let repo = Repository::<DataSet>::new("data_sets");
    let data_sets = repo.select_any(&mut conn, repo.filter()?).await?;

    if data_sets.is_empty() {
        return output_empty_collection(&output_format, "data_sets", "No data sets");
    }

    let mut rows = vec![];
    for data_set in &data_sets {
        let (group, data_type) = data_set.group_and_type(&mut conn).await?;
        rows.push((data_set.name.clone(), group, data_type));
    }

    match output_format {
        OutputFormat::Json => {
            let items: Vec<_> = rows
                .iter()
                .map(|(name, group, data_type)| json!({ "name": name, "data_group": group, "data_type": data_type }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "data_sets": items }))?);
        }
        OutputFormat::Text => {
            println!("{:<40} {:<25} {}", "NAME", "DATA GROUP", "DATA TYPE");
            println!("{}", "-".repeat(80));
            for (name, group, data_type) in &rows {
                println!("{:<40} {:<25} {}", name, group, data_type);
            }
        }
    }
    Ok(())
}
