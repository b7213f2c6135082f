use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::validation::{FieldErrors, ValidationError, TIMESTAMP_SCHEMA};

static DATA_SET_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("valid data set name regex"));

/// Group and type names share the slug rule `^[a-z0-9-]+$`
fn check_name(errors: &mut FieldErrors, name: &str, max: usize) {
    if name.is_empty() {
        errors.add("name", "This field cannot be blank.");
    } else if !crate::validation::is_slug(name) {
        errors.add("name", "Name can only contain lower case letters, numbers or hyphens");
    }
    if name.chars().count() > max {
        errors.add("name", format!("Ensure this value has at most {} characters.", max));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataGroup {
    pub id: Uuid,
    pub name: String,
}

impl DataGroup {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new() }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::new();
        check_name(&mut errors, &self.name, 50);
        if errors.is_empty() { Ok(()) } else { Err(ValidationError::Model(errors.message())) }
    }

    pub fn serialize(&self) -> Value {
        json!({ "name": self.name })
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO data_groups (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(self.id)
        .bind(&self.name)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataType {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

impl DataType {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new(), description: String::new() }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::new();
        check_name(&mut errors, &self.name, 60);
        if errors.is_empty() { Ok(()) } else { Err(ValidationError::Model(errors.message())) }
    }

    pub fn serialize(&self) -> Value {
        json!({ "name": self.name, "description": self.description })
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO data_types (id, name, description) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, description = EXCLUDED.description",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.description)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

pub const DEFAULT_MAX_AGE_EXPECTED: i32 = 86400;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataSet {
    pub id: Uuid,
    pub name: String,
    pub data_group_id: Uuid,
    pub data_type_id: Uuid,
    pub raw_queries_allowed: bool,
    pub bearer_token: String,
    pub upload_format: String,
    pub upload_filters: String,
    pub auto_ids: String,
    pub queryable: bool,
    pub realtime: bool,
    pub capped_size: Option<i64>,
    pub max_age_expected: Option<i32>,
    pub published: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl DataSet {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            data_group_id: Uuid::nil(),
            data_type_id: Uuid::nil(),
            raw_queries_allowed: true,
            bearer_token: String::new(),
            upload_format: String::new(),
            upload_filters: String::new(),
            auto_ids: String::new(),
            queryable: true,
            realtime: false,
            capped_size: None,
            max_age_expected: Some(DEFAULT_MAX_AGE_EXPECTED),
            published: false,
            created: now,
            modified: now,
        }
    }

    /// `<group>_<type>` with hyphens replaced, e.g. `govuk-info` + `page-stats` -> `govuk_info_page_stats`
    pub fn generate_name(data_group: &str, data_type: &str) -> String {
        format!("{}_{}", data_group, data_type).replace('-', "_")
    }

    /// `name` and `capped_size` are fixed once the data set exists
    pub fn check_immutable(&self, existing: &DataSet) -> Result<(), ValidationError> {
        let mut changed = vec![];
        if self.name != existing.name {
            changed.push("name");
        }
        if self.capped_size != existing.capped_size {
            changed.push("capped_size");
        }
        if changed.is_empty() {
            return Ok(());
        }
        Err(ValidationError::Model(format!("{} cannot be modified", changed.join(", "))))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::new();
        if !DATA_SET_NAME_RE.is_match(&self.name) {
            errors.add("name", "Name can only contain lower case letters, numbers or underscores");
        }
        if self.name.chars().count() > 200 {
            errors.add("name", "Ensure this value has at most 200 characters.");
        }
        if matches!(self.capped_size, Some(size) if size < 0) {
            errors.add("capped_size", "Ensure this value is greater than or equal to 0.");
        }
        if errors.is_empty() { Ok(()) } else { Err(ValidationError::Model(errors.message())) }
    }

    pub fn is_capped(&self) -> bool {
        matches!(self.capped_size, Some(size) if size > 0)
    }

    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let (data_group, data_type) = self.group_and_type(conn).await?;
        let bearer_token = if self.bearer_token.is_empty() { Value::Null } else { json!(self.bearer_token) };
        Ok(json!({
            "name": self.name,
            "data_group": data_group,
            "data_type": data_type,
            "raw_queries_allowed": self.raw_queries_allowed,
            "bearer_token": bearer_token,
            "upload_format": self.upload_format,
            "upload_filters": comma_list(&self.upload_filters),
            "auto_ids": comma_list(&self.auto_ids),
            "queryable": self.queryable,
            "realtime": self.realtime,
            "capped_size": self.capped_size,
            "max_age_expected": self.max_age_expected,
            "published": self.published,
            "schema": TIMESTAMP_SCHEMA.clone(),
        }))
    }

    pub async fn find_by_name(conn: &mut PgConnection, name: &str) -> Result<Option<DataSet>, DatabaseError> {
        let row = sqlx::query_as::<_, DataSet>("SELECT * FROM data_sets WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn delete(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM data_sets WHERE id = $1").bind(self.id).execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn save(&mut self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        self.modified = Utc::now();
        sqlx::query(
            "INSERT INTO data_sets (
                id, name, data_group_id, data_type_id, raw_queries_allowed, bearer_token,
                upload_format, upload_filters, auto_ids, queryable, realtime, capped_size,
                max_age_expected, published, created, modified
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (id) DO UPDATE SET
                data_group_id = EXCLUDED.data_group_id,
                data_type_id = EXCLUDED.data_type_id,
                bearer_token = EXCLUDED.bearer_token,
                upload_format = EXCLUDED.upload_format,
                upload_filters = EXCLUDED.upload_filters,
                auto_ids = EXCLUDED.auto_ids,
                queryable = EXCLUDED.queryable,
                realtime = EXCLUDED.realtime,
                max_age_expected = EXCLUDED.max_age_expected,
                published = EXCLUDED.published,
                modified = EXCLUDED.modified",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(self.data_group_id)
        .bind(self.data_type_id)
        .bind(self.raw_queries_allowed)
        .bind(&self.bearer_token)
        .bind(&self.upload_format)
        .bind(&self.upload_filters)
        .bind(&self.auto_ids)
        .bind(self.queryable)
        .bind(self.realtime)
        .bind(self.capped_size)
        .bind(self.max_age_expected)
        .bind(self.published)
        .bind(self.created)
        .bind(self.modified)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// `(data_group, data_type)` names
    pub async fn group_and_type(&self, conn: &mut PgConnection) -> Result<(String, String), DatabaseError> {
        let names: (String, String) = sqlx::query_as(
            "SELECT g.name, t.name FROM data_groups g, data_types t WHERE g.id = $1 AND t.id = $2",
        )
        .bind(self.data_group_id)
        .bind(self.data_type_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(names)
    }

    pub async fn find_by_group_and_type(
        conn: &mut PgConnection,
        data_group: &str,
        data_type: &str,
    ) -> Result<Option<DataSet>, DatabaseError> {
        let row = sqlx::query_as::<_, DataSet>(
            "SELECT ds.* FROM data_sets ds
             JOIN data_groups g ON g.id = ds.data_group_id
             JOIN data_types t ON t.id = ds.data_type_id
             WHERE g.name = $1 AND t.name = $2",
        )
        .bind(data_group)
        .bind(data_type)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Update the bearer token of every data set matching the given group and/or type names
    pub async fn set_token(
        conn: &mut PgConnection,
        token: &str,
        data_group: Option<&str>,
        data_type: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE data_sets SET bearer_token = $1, modified = now()
             WHERE ($2::text IS NULL OR data_group_id IN (SELECT id FROM data_groups WHERE name = $2))
               AND ($3::text IS NULL OR data_type_id IN (SELECT id FROM data_types WHERE name = $3))",
        )
        .bind(token)
        .bind(data_group)
        .bind(data_type)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Emails of users owning the data set named `name`
    pub async fn user_emails(conn: &mut PgConnection, name: &str) -> Result<Vec<String>, DatabaseError> {
        let emails = sqlx::query_scalar(
            "SELECT u.email FROM users u
             JOIN data_set_owners o ON o.user_id = u.id
             JOIN data_sets ds ON ds.id = o.data_set_id
             WHERE ds.name = $1 ORDER BY u.email",
        )
        .bind(name)
        .fetch_all(&mut *conn)
        .await?;
        Ok(emails)
    }
}

/// Split a comma separated column into trimmed entries; empty string gives an empty list
pub fn comma_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return vec![];
    }
    value.split(',').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_name_uses_underscores() {
        assert_eq!(DataSet::generate_name("govuk-info", "page-stats"), "govuk_info_page_stats");
        assert_eq!(DataSet::generate_name("lpa", "volumes"), "lpa_volumes");
    }

    #[test]
    fn comma_list_trims_entries() {
        assert_eq!(comma_list(""), Vec::<String>::new());
        assert_eq!(comma_list("a, b ,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn name_and_capped_size_are_immutable() {
        let existing = DataSet::new();
        let mut changed = existing.clone();
        assert!(changed.check_immutable(&existing).is_ok());

        changed.name = "other_name".to_string();
        changed.capped_size = Some(4096);
        let err = changed.check_immutable(&existing).unwrap_err();
        assert_eq!(err.to_string(), "name, capped_size cannot be modified");
    }

    #[test]
    fn group_names_must_be_slugs() {
        let mut group = DataGroup::new();
        group.name = "govuk-info".to_string();
        assert!(group.validate().is_ok());
        group.name = "Govuk Info".to_string();
        assert!(group.validate().is_err());
        group.name = String::new();
        assert_eq!(group.validate().unwrap_err().to_string(), "name: This field cannot be blank.");
    }

    #[test]
    fn new_data_set_has_defaults() {
        let ds = DataSet::new();
        assert!(ds.raw_queries_allowed);
        assert!(ds.queryable);
        assert!(!ds.realtime);
        assert!(!ds.published);
        assert_eq!(ds.max_age_expected, Some(86400));
    }
}
