use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::repository;
use crate::filter::OwnerTable;
use crate::validation::{self, ValidationError};

static ENTRY_POINT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_.]+$").expect("valid entry point regex"));
static NON_SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slugify regex"));

/// Lowercase `name` and collapse every run of other characters into a single hyphen
pub fn slugify(name: &str) -> String {
    NON_SLUG_RE
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub credentials_schema: Value,
}

impl Provider {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new(), credentials_schema: json!({}) }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::check_schema(&self.credentials_schema)
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO providers (id, name, credentials_schema) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, credentials_schema = EXCLUDED.credentials_schema",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.credentials_schema)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub fn serialize(&self) -> Value {
        json!({ "id": self.id, "name": self.name, "credentials_schema": self.credentials_schema })
    }

    pub fn summary(&self) -> Value {
        json!({ "id": self.id, "name": self.name })
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<Provider>, DatabaseError> {
        let row = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub provider_id: Uuid,
    /// JSON document stored as text
    pub credentials: String,
}

impl DataSource {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new(), provider_id: Uuid::nil(), credentials: "{}".to_string() }
    }

    pub async fn validate(&self, conn: &mut PgConnection) -> Result<(), ValidationError> {
        let credentials: Value = serde_json::from_str(&self.credentials)
            .map_err(|_| ValidationError::Model("credentials are not valid JSON".to_string()))?;
        let provider = Provider::find(conn, self.provider_id)
            .await
            .map_err(|e| ValidationError::Model(e.to_string()))?
            .ok_or_else(|| ValidationError::Model(format!("No provider with id '{}' found", self.provider_id)))?;
        validation::validate_against(&provider.credentials_schema, &credentials)
            .map_err(|e| ValidationError::Model(format!("credentials are invalid: {}", e)))
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO data_sources (id, name, provider_id, credentials) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name, provider_id = EXCLUDED.provider_id, credentials = EXCLUDED.credentials",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(self.provider_id)
        .bind(&self.credentials)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<DataSource>, DatabaseError> {
        let row = sqlx::query_as::<_, DataSource>("SELECT * FROM data_sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Credentials are never returned
    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let mut out = json!({ "id": self.id, "name": self.name });
        if let Some(provider) = Provider::find(conn, self.provider_id).await? {
            out["provider"] = provider.summary();
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectorType {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub provider_id: Uuid,
    pub entry_point: String,
    pub query_schema: Value,
    pub options_schema: Value,
}

impl CollectorType {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            slug: String::new(),
            provider_id: Uuid::nil(),
            entry_point: String::new(),
            query_schema: json!({}),
            options_schema: json!({}),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !validation::is_slug(&self.slug) {
            return Err(ValidationError::Model(
                "Slug can only contain lower case letters, numbers or hyphens".to_string(),
            ));
        }
        if !ENTRY_POINT_RE.is_match(&self.entry_point) {
            return Err(ValidationError::Model(
                "Collector entry point function has to consist of lowercase letters, underscores or dots".to_string(),
            ));
        }
        validation::check_schema(&self.query_schema)
            .map_err(|e| ValidationError::Model(format!("query {}", e)))?;
        validation::check_schema(&self.options_schema)
            .map_err(|e| ValidationError::Model(format!("options {}", e)))
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO collector_types (id, name, slug, provider_id, entry_point, query_schema, options_schema)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name,
               slug = EXCLUDED.slug,
               provider_id = EXCLUDED.provider_id,
               entry_point = EXCLUDED.entry_point,
               query_schema = EXCLUDED.query_schema,
               options_schema = EXCLUDED.options_schema",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.slug)
        .bind(self.provider_id)
        .bind(&self.entry_point)
        .bind(&self.query_schema)
        .bind(&self.options_schema)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<CollectorType>, DatabaseError> {
        let row = sqlx::query_as::<_, CollectorType>("SELECT * FROM collector_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let mut out = json!({
            "id": self.id,
            "name": self.name,
            "slug": self.slug,
            "entry_point": self.entry_point,
            "query_schema": self.query_schema,
            "options_schema": self.options_schema,
        });
        if let Some(provider) = Provider::find(conn, self.provider_id).await? {
            out["provider"] = provider.summary();
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Collector {
    pub id: Uuid,
    pub name: String,
    pub type_id: Uuid,
    pub data_source_id: Uuid,
    pub data_set_id: Uuid,
    pub query: Value,
    pub options: Value,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            type_id: Uuid::nil(),
            data_source_id: Uuid::nil(),
            data_set_id: Uuid::nil(),
            query: json!({}),
            options: json!({}),
        }
    }

    /// `"<type name> <data group> <data type>"`
    pub fn derive_name(type_name: &str, data_group: &str, data_type: &str) -> String {
        format!("{} {} {}", type_name, data_group, data_type)
    }

    /// Query and options must match the collector type's schemas, and the type and data
    /// source must share a provider. With `owner` set, that user must also own the data
    /// source and the data set.
    pub async fn validate(&self, conn: &mut PgConnection, owner: Option<&str>) -> Result<(), ValidationError> {
        let model = |e: DatabaseError| ValidationError::Model(e.to_string());

        let collector_type = CollectorType::find(conn, self.type_id)
            .await
            .map_err(model)?
            .ok_or_else(|| ValidationError::Model(format!("No collector type with id '{}' found", self.type_id)))?;
        let data_source = DataSource::find(conn, self.data_source_id)
            .await
            .map_err(model)?
            .ok_or_else(|| ValidationError::Model(format!("No data source with id '{}' found", self.data_source_id)))?;

        validation::validate_against(&collector_type.query_schema, &self.query)
            .map_err(|e| ValidationError::Model(format!("query is invalid: {}", e)))?;
        validation::validate_against(&collector_type.options_schema, &self.options)
            .map_err(|e| ValidationError::Model(format!("options are invalid: {}", e)))?;

        if collector_type.provider_id != data_source.provider_id {
            let type_provider = Provider::find(conn, collector_type.provider_id).await.map_err(model)?;
            let source_provider = Provider::find(conn, data_source.provider_id).await.map_err(model)?;
            let name = |p: Option<Provider>| p.map(|p| p.name).unwrap_or_default();
            return Err(ValidationError::Model(format!(
                "type ({}) and data source ({}) have different providers",
                name(type_provider),
                name(source_provider)
            )));
        }

        if let Some(email) = owner {
            let checks = [
                (OwnerTable { table: "data_source_owners", column: "data_source_id" }, self.data_source_id, "data source"),
                (OwnerTable { table: "data_set_owners", column: "data_set_id" }, self.data_set_id, "data set"),
            ];
            for (owners, id, what) in checks {
                if !repository::is_owner(conn, owners, id, email).await.map_err(model)? {
                    return Err(ValidationError::Model(format!("the current user is not an owner of the {}", what)));
                }
            }
        }
        Ok(())
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO collectors (id, name, type_id, data_source_id, data_set_id, query, options)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name,
               type_id = EXCLUDED.type_id,
               data_source_id = EXCLUDED.data_source_id,
               data_set_id = EXCLUDED.data_set_id,
               query = EXCLUDED.query,
               options = EXCLUDED.options",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(self.type_id)
        .bind(self.data_source_id)
        .bind(self.data_set_id)
        .bind(&self.query)
        .bind(&self.options)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let mut out = json!({
            "id": self.id,
            "name": self.name,
            "query": self.query,
            "options": self.options,
        });
        if let Some(t) = CollectorType::find(conn, self.type_id).await? {
            out["type"] = json!({ "id": t.id, "name": t.name });
        }
        if let Some(source) = DataSource::find(conn, self.data_source_id).await? {
            out["data_source"] = json!({ "id": source.id, "name": source.name });
        }
        let names: Option<(String, String)> = sqlx::query_as(
            "SELECT g.name, t.name FROM data_sets ds
             JOIN data_groups g ON g.id = ds.data_group_id
             JOIN data_types t ON t.id = ds.data_type_id
             WHERE ds.id = $1",
        )
        .bind(self.data_set_id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some((group, data_type)) = names {
            out["data_set"] = json!({ "data_type": data_type, "data_group": group });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Google Analytics"), "google-analytics");
        assert_eq!(slugify("  GA: Realtime!! "), "ga-realtime");
    }

    #[test]
    fn collector_name_joins_type_and_data_set() {
        assert_eq!(Collector::derive_name("GA", "carers-allowance", "volumes"), "GA carers-allowance volumes");
    }

    #[test]
    fn collector_type_validation() {
        let mut t = CollectorType::new();
        t.slug = "ga-realtime".to_string();
        t.entry_point = "performanceplatform.collector.ga.realtime".to_string();
        assert!(t.validate().is_ok());

        t.entry_point = "Bad Entry".to_string();
        assert!(t.validate().is_err());

        t.entry_point = "ok.entry".to_string();
        t.options_schema = json!({ "type": 5 });
        let err = t.validate().unwrap_err().to_string();
        assert!(err.starts_with("options schema is invalid"), "{}", err);
    }

    #[test]
    fn provider_schema_must_compile() {
        let mut p = Provider::new();
        assert!(p.validate().is_ok());
        p.credentials_schema = json!({ "required": "nope" });
        assert!(p.validate().is_err());
    }
}
