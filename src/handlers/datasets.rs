use async_trait::async_trait;
use axum::{
    extract::{Path, Query},
    http::HeaderMap,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{authorize, AuthUser};
use crate::database::models::{DataGroup, DataSet, DataType, User};
use crate::database::{finish, repository, DatabaseManager, Repository};
use crate::error::ApiError;
use crate::filter::{Filter, ListFilter, OwnerTable};
use crate::handlers::resource::{self, IdField, Params, Resource};
use crate::middleware::{ApiResponse, ApiResult, LONG_CACHE_SECS};
use crate::services::backdrop::{self, BackdropError};
use crate::services::purge;
use crate::types::{ResourceKind, Verb};

const DATA_SET_OWNERS: OwnerTable = OwnerTable { table: "data_set_owners", column: "data_set_id" };

const DATA_SET_FILTERS: &[ListFilter] = &[
    ListFilter::name_of("data-group", "data_group_id", "data_groups"),
    ListFilter::name_of("data_group", "data_group_id", "data_groups"),
    ListFilter::name_of("data-type", "data_type_id", "data_types"),
    ListFilter::name_of("data_type", "data_type_id", "data_types"),
];

static NAMED_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "description": { "type": "string" }
        },
        "required": ["name"],
        "additionalProperties": false
    })
});

static DATA_SET_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "data_group": { "type": "string", "format": "slug" },
            "data_type": { "type": "string", "format": "slug" },
            "bearer_token": { "type": ["string", "null"] },
            "upload_format": { "type": "string" },
            "upload_filters": { "type": "array", "items": { "type": "string" } },
            "auto_ids": { "type": "array", "items": { "type": "string" } },
            "queryable": { "type": "boolean" },
            "realtime": { "type": "boolean" },
            "capped_size": { "type": ["integer", "null"], "minimum": 0 },
            "max_age_expected": { "type": ["integer", "null"], "minimum": 0 },
            "published": { "type": "boolean" }
        },
        "required": ["data_group", "data_type"],
        "additionalProperties": false
    })
});

#[async_trait]
impl Resource for DataGroup {
    const KIND: ResourceKind = ResourceKind::DataGroup;
    const TABLE: &'static str = "data_groups";
    const ID_FIELDS: &'static [IdField] = &[IdField::Name("name")];
    const LIST_FILTERS: &'static [ListFilter] = &[ListFilter::exact("name", "name")];

    fn schema() -> &'static Value {
        &NAMED_SCHEMA
    }

    fn create() -> Self {
        DataGroup::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(DataGroup::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(DataGroup::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(DataGroup::serialize(self))
    }
}

#[async_trait]
impl Resource for DataType {
    const KIND: ResourceKind = ResourceKind::DataType;
    const TABLE: &'static str = "data_types";
    const ID_FIELDS: &'static [IdField] = &[IdField::Name("name")];
    const LIST_FILTERS: &'static [ListFilter] = &[ListFilter::exact("name", "name")];

    fn schema() -> &'static Value {
        &NAMED_SCHEMA
    }

    fn create() -> Self {
        DataType::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        if let Some(description) = body.get("description").and_then(Value::as_str) {
            self.description = description.to_string();
        }
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(DataType::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(DataType::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(DataType::serialize(self))
    }
}

fn join_list(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(",")
    })
}

#[async_trait]
impl Resource for DataSet {
    const KIND: ResourceKind = ResourceKind::DataSet;
    const TABLE: &'static str = "data_sets";
    const ID_FIELDS: &'static [IdField] = &[IdField::Name("name")];
    const LIST_FILTERS: &'static [ListFilter] = DATA_SET_FILTERS;
    const OWNERS: Option<OwnerTable> = Some(DATA_SET_OWNERS);

    fn schema() -> &'static Value {
        &DATA_SET_SCHEMA
    }

    fn create() -> Self {
        DataSet::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, created: bool) -> Result<(), ApiError> {
        let before = self.clone();

        let group_name = resource::str_field(body, "data_group")?;
        let type_name = resource::str_field(body, "data_type")?;
        let group = Repository::<DataGroup>::new("data_groups")
            .find_by(conn, "name", group_name)
            .await?
            .ok_or_else(|| ApiError::bad_request(format!("data group '{}' not found", group_name)))?;
        let data_type = Repository::<DataType>::new("data_types")
            .find_by(conn, "name", type_name)
            .await?
            .ok_or_else(|| ApiError::bad_request(format!("data type '{}' not found", type_name)))?;

        self.data_group_id = group.id;
        self.data_type_id = data_type.id;
        self.name = DataSet::generate_name(&group.name, &data_type.name);

        if let Some(token) = body.get("bearer_token") {
            self.bearer_token = token.as_str().unwrap_or_default().to_string();
        }
        if let Some(format) = body.get("upload_format").and_then(Value::as_str) {
            self.upload_format = format.to_string();
        }
        if let Some(filters) = join_list(body, "upload_filters") {
            self.upload_filters = filters;
        }
        if let Some(auto_ids) = join_list(body, "auto_ids") {
            self.auto_ids = auto_ids;
        }
        if let Some(queryable) = body.get("queryable").and_then(Value::as_bool) {
            self.queryable = queryable;
        }
        if let Some(realtime) = body.get("realtime").and_then(Value::as_bool) {
            self.realtime = realtime;
        }
        if let Some(published) = body.get("published").and_then(Value::as_bool) {
            self.published = published;
        }
        if let Some(capped_size) = body.get("capped_size") {
            self.capped_size = capped_size.as_i64();
        }
        if let Some(max_age) = body.get("max_age_expected") {
            self.max_age_expected = max_age.as_i64().and_then(|v| i32::try_from(v).ok());
        }

        if !created {
            self.check_immutable(&before)?;
        }
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(DataSet::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(DataSet::save(self, conn).await?)
    }

    /// New data sets get an owner and a backing collection; every save purges the caches
    async fn after_save(&self, conn: &mut PgConnection, user: &AuthUser, created: bool) -> Result<(), ApiError> {
        if created {
            repository::add_owner(conn, DATA_SET_OWNERS, self.id, &user.email).await?;
            backdrop::create_dataset(&self.name, self.capped_size.unwrap_or(0)).await?;
        }
        let (group, data_type) = self.group_and_type(conn).await?;
        purge::purge_or_log(&purge::data_set_paths(&self.name, &group, &data_type)).await;
        Ok(())
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(DataSet::serialize(self, conn).await?)
    }
}

fn no_data_set(name: &str) -> ApiError {
    ApiError::not_found(format!("No Data Set named '{}' exists", name))
}

const LIST_PARAMS: &[&str] = &["data-group", "data_group", "data-type", "data_type"];

/// `GET /data-sets`; unknown query parameters are refused
pub async fn list(headers: HeaderMap, Query(params): Query<Params>) -> ApiResult {
    let user = authorize(&headers, ResourceKind::DataSet, Verb::Get, None).await?;
    Filter::reject_unrecognised(&params, LIST_PARAMS)?;

    let mut conn = resource::connection().await?;
    let data_sets = resource::list_models::<DataSet>(&mut conn, &params, user.as_ref()).await?;
    Ok(ApiResponse::json(resource::serialize_all(&mut conn, &data_sets).await?))
}

pub async fn detail(headers: HeaderMap, Path(name): Path<String>) -> ApiResult {
    let user = authorize(&headers, ResourceKind::DataSet, Verb::Get, None).await?;
    let mut conn = resource::connection().await?;
    let data_set = match resource::by_id::<DataSet>(&mut conn, &name, user.as_ref()).await {
        Ok(data_set) => data_set,
        Err(e) if e.status_code() == 404 => return Err(no_data_set(&name)),
        Err(e) => return Err(e),
    };
    Ok(ApiResponse::json(data_set.serialize(&mut conn).await?))
}

/// Remove the backing collection first; one that is already gone is not an error
pub async fn delete(headers: HeaderMap, Path(name): Path<String>) -> ApiResult {
    authorize(&headers, ResourceKind::DataSet, Verb::Delete, None).await?;

    let mut tx = DatabaseManager::begin().await?;
    let result = delete_data_set(&mut tx, &name).await;
    let paths = finish(tx, result).await?;
    purge::purge_or_log(&paths).await;

    Ok(ApiResponse::json(json!({
        "status": "ok",
        "message": format!("Deleted data set '{}'", name),
    })))
}

async fn delete_data_set(conn: &mut PgConnection, name: &str) -> Result<std::collections::BTreeSet<String>, ApiError> {
    let data_set = DataSet::find_by_name(conn, name).await?.ok_or_else(|| no_data_set(name))?;
    let (group, data_type) = data_set.group_and_type(conn).await?;

    match backdrop::delete_dataset(name).await {
        Ok(()) => {}
        Err(BackdropError::NotFound(_)) => warn!("Data set '{}' was already missing from backdrop", name),
        Err(e) => return Err(e.into()),
    }

    data_set.delete(conn).await?;
    info!("Deleted data set '{}'", name);
    Ok(purge::data_set_paths(name, &group, &data_type))
}

/// `GET /data-sets/{name}/users`
pub async fn users(headers: HeaderMap, Path(name): Path<String>) -> ApiResult {
    authorize(&headers, ResourceKind::DataSetUsers, Verb::Get, None).await?;
    let mut conn = resource::connection().await?;

    let repo = Repository::<User>::new("users");
    let mut users = vec![];
    for email in DataSet::user_emails(&mut conn, &name).await? {
        if let Some(user) = repo.find_by(&mut conn, "email", &email).await? {
            users.push(user.serialize(&mut conn).await?);
        }
    }
    Ok(ApiResponse::json(Value::Array(users)).max_age(LONG_CACHE_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_request;

    #[test]
    fn data_set_body_requires_group_and_type_slugs() {
        let ok = json!({ "data_group": "lpa", "data_type": "volumes", "capped_size": 4096 });
        assert!(validate_request(DataSet::schema(), &ok).is_ok());

        let bad_slug = json!({ "data_group": "LPA Group", "data_type": "volumes" });
        assert!(validate_request(DataSet::schema(), &bad_slug).is_err());

        let negative = json!({ "data_group": "lpa", "data_type": "volumes", "capped_size": -1 });
        assert!(validate_request(DataSet::schema(), &negative).is_err());

        let missing = json!({ "data_group": "lpa" });
        assert!(validate_request(DataSet::schema(), &missing).is_err());
    }

    #[test]
    fn list_fields_are_joined_with_commas() {
        let body = json!({ "upload_filters": ["a.b", "c.d"], "auto_ids": [] });
        assert_eq!(join_list(&body, "upload_filters").as_deref(), Some("a.b,c.d"));
        assert_eq!(join_list(&body, "auto_ids").as_deref(), Some(""));
        assert_eq!(join_list(&body, "missing"), None);
    }

    #[test]
    fn missing_data_set_message_names_it() {
        let err = no_data_set("lpa_volumes");
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.message(), "No Data Set named 'lpa_volumes' exists");
    }
}
