use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::collectors::slugify;
use crate::database::models::{Collector, CollectorType, DataSet, DataSource, Provider};
use crate::error::ApiError;
use crate::filter::{ListFilter, OwnerTable};
use crate::handlers::resource::{self, IdField, Resource};
use crate::types::ResourceKind;

const BY_ID_OR_NAME: &[IdField] = &[IdField::Uuid, IdField::Name("name")];
const BY_NAME: &[ListFilter] = &[ListFilter::iexact("name", "name")];

static PROVIDER_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "credentials_schema": { "type": "object" }
        },
        "required": ["name"],
        "additionalProperties": false
    })
});

static DATA_SOURCE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "provider": { "type": "string" },
            "credentials": { "type": "object" }
        },
        "required": ["name", "provider"],
        "additionalProperties": false
    })
});

static COLLECTOR_TYPE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "provider": { "type": "string" },
            "entry_point": { "type": "string" },
            "query_schema": { "type": "object" },
            "options_schema": { "type": "object" }
        },
        "required": ["name", "provider", "entry_point"],
        "additionalProperties": false
    })
});

static COLLECTOR_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "type": { "type": "string" },
            "data_source": { "type": "string" },
            "data_set": {
                "type": "object",
                "properties": {
                    "data_group": { "type": "string" },
                    "data_type": { "type": "string" }
                },
                "required": ["data_group", "data_type"]
            },
            "query": { "type": "object" },
            "options": { "type": "object" }
        },
        "required": ["type", "data_source", "data_set"],
        "additionalProperties": false
    })
});

/// Provider named by the body's `provider` id
async fn provider_from(conn: &mut PgConnection, body: &Value) -> Result<Provider, ApiError> {
    let raw = resource::str_field(body, "provider")?;
    let not_found = || ApiError::bad_request(format!("No provider with id '{}' found", raw));
    let id = Uuid::parse_str(raw).map_err(|_| not_found())?;
    Provider::find(conn, id).await?.ok_or_else(not_found)
}

#[async_trait]
impl Resource for Provider {
    const KIND: ResourceKind = ResourceKind::Provider;
    const TABLE: &'static str = "providers";
    const ID_FIELDS: &'static [IdField] = BY_ID_OR_NAME;
    const LIST_FILTERS: &'static [ListFilter] = BY_NAME;

    fn schema() -> &'static Value {
        &PROVIDER_SCHEMA
    }

    fn create() -> Self {
        Provider::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        if let Some(schema) = body.get("credentials_schema") {
            self.credentials_schema = schema.clone();
        }
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(Provider::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(Provider::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(Provider::serialize(self))
    }
}

#[async_trait]
impl Resource for DataSource {
    const KIND: ResourceKind = ResourceKind::DataSource;
    const TABLE: &'static str = "data_sources";
    const ID_FIELDS: &'static [IdField] = BY_ID_OR_NAME;
    const LIST_FILTERS: &'static [ListFilter] = BY_NAME;
    const OWNERS: Option<OwnerTable> = Some(OwnerTable { table: "data_source_owners", column: "data_source_id" });

    fn schema() -> &'static Value {
        &DATA_SOURCE_SCHEMA
    }

    fn create() -> Self {
        DataSource::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        let provider = provider_from(conn, body).await?;
        self.provider_id = provider.id;
        self.name = resource::str_field(body, "name")?.to_string();
        if let Some(credentials) = body.get("credentials") {
            self.credentials = credentials.to_string();
        }
        Ok(())
    }

    async fn validate(&mut self, conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(DataSource::validate(self, conn).await?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(DataSource::save(self, conn).await?)
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(DataSource::serialize(self, conn).await?)
    }
}

#[async_trait]
impl Resource for CollectorType {
    const KIND: ResourceKind = ResourceKind::CollectorType;
    const TABLE: &'static str = "collector_types";
    const ID_FIELDS: &'static [IdField] = BY_ID_OR_NAME;
    const LIST_FILTERS: &'static [ListFilter] = BY_NAME;

    fn schema() -> &'static Value {
        &COLLECTOR_TYPE_SCHEMA
    }

    fn create() -> Self {
        CollectorType::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        let provider = provider_from(conn, body).await?;
        self.provider_id = provider.id;
        self.name = resource::str_field(body, "name")?.to_string();
        self.slug = slugify(&self.name);
        self.entry_point = resource::str_field(body, "entry_point")?.to_string();
        if let Some(schema) = body.get("query_schema") {
            self.query_schema = schema.clone();
        }
        if let Some(schema) = body.get("options_schema") {
            self.options_schema = schema.clone();
        }
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(CollectorType::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(CollectorType::save(self, conn).await?)
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(CollectorType::serialize(self, conn).await?)
    }
}

#[async_trait]
impl Resource for Collector {
    const KIND: ResourceKind = ResourceKind::Collector;
    const TABLE: &'static str = "collectors";
    const LIST_FILTERS: &'static [ListFilter] = BY_NAME;
    const OWNERS: Option<OwnerTable> = Some(OwnerTable { table: "collector_owners", column: "collector_id" });

    fn schema() -> &'static Value {
        &COLLECTOR_SCHEMA
    }

    fn create() -> Self {
        Collector::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        let type_ref = resource::str_field(body, "type")?;
        let collector_type = match Uuid::parse_str(type_ref) {
            Ok(id) => CollectorType::find(conn, id).await?,
            Err(_) => None,
        }
        .ok_or_else(|| ApiError::bad_request(format!("No collector type with id '{}' found", type_ref)))?;

        let source_ref = resource::str_field(body, "data_source")?;
        let data_source = match Uuid::parse_str(source_ref) {
            Ok(id) => DataSource::find(conn, id).await?,
            Err(_) => None,
        }
        .ok_or_else(|| ApiError::bad_request(format!("No data source with id '{}' found", source_ref)))?;

        let data_group = resource::str_field(&body["data_set"], "data_group")?;
        let data_type = resource::str_field(&body["data_set"], "data_type")?;
        let data_set = DataSet::find_by_group_and_type(conn, data_group, data_type)
            .await?
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "No data set with data group '{}' and data type '{}' found",
                    data_group, data_type
                ))
            })?;

        self.type_id = collector_type.id;
        self.data_source_id = data_source.id;
        self.data_set_id = data_set.id;
        self.name = Collector::derive_name(&collector_type.name, data_group, data_type);
        if let Some(query) = body.get("query") {
            self.query = query.clone();
        }
        if let Some(options) = body.get("options") {
            self.options = options.clone();
        }
        Ok(())
    }

    /// Non-admin users must own both the data source and the data set
    async fn validate(&mut self, conn: &mut PgConnection, user: &AuthUser) -> Result<(), ApiError> {
        let owner = (!user.is_admin()).then_some(user.email.as_str());
        Ok(Collector::validate(self, conn, owner).await?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(Collector::save(self, conn).await?)
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(Collector::serialize(self, conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_request;

    #[test]
    fn collector_body_needs_type_source_and_data_set() {
        let ok = json!({
            "type": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f",
            "data_source": "0b1c2d3e-4f5a-4b6c-8d7e-9f0a1b2c3d4e",
            "data_set": { "data_group": "lpa", "data_type": "volumes" },
            "query": {},
            "options": {}
        });
        assert!(validate_request(Collector::schema(), &ok).is_ok());

        let mut no_type = ok.clone();
        no_type["data_set"] = json!({ "data_group": "lpa" });
        assert!(validate_request(Collector::schema(), &no_type).is_err());

        let extra = json!({ "type": "x", "data_source": "y", "data_set": {}, "name": "z" });
        assert!(validate_request(Collector::schema(), &extra).is_err());
    }

    #[test]
    fn provider_and_collector_types_accept_names_as_ids() {
        assert!(Provider::ID_FIELDS.iter().any(|f| f.matches("google-analytics")));
        assert!(!Collector::ID_FIELDS.iter().any(|f| f.matches("google-analytics")));
    }
}
