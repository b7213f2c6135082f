use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::HeaderMap,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{authorize, AuthUser};
use crate::config::config;
use crate::database::models::{DataSet, Dashboard, Module, ModuleType, Node};
use crate::database::{finish, repository, DatabaseManager, Repository};
use crate::error::ApiError;
use crate::filter::{ListFilter, OwnerTable};
use crate::handlers::resource::{self, json_body, Params, Resource};
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{ResourceKind, Verb};
use crate::validation::{self, validate_request};

const DASHBOARD_OWNERS: OwnerTable = OwnerTable { table: "dashboard_owners", column: "dashboard_id" };
const SPOTLIGHT_MAX_AGE: u32 = 300;
const DASHBOARD_LIST_MAX_AGE: u32 = 60;

static MODULE_TYPE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "schema": { "type": "object" }
        },
        "required": ["name", "schema"],
        "additionalProperties": false
    })
});

static MODULE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "format": "uuid" },
            "type_id": { "type": "string", "format": "uuid" },
            "slug": { "type": "string", "format": "slug" },
            "title": { "type": "string" },
            "description": { "type": "string" },
            "info": { "type": "array", "items": { "type": "string" } },
            "options": { "type": "object" },
            "query_parameters": { "type": ["object", "null"] },
            "order": { "type": "integer" },
            "data_group": { "type": "string" },
            "data_type": { "type": "string" },
            "modules": { "type": "array", "items": { "type": "object" } }
        },
        "required": ["type_id", "slug", "title"]
    })
});

static DASHBOARD_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "organisation": { "type": ["string", "null"] },
            "links": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "url": { "type": "string" },
                        "type": { "type": "string", "enum": ["transaction", "other"] }
                    },
                    "required": ["title", "url", "type"]
                }
            },
            "modules": { "type": "array", "items": MODULE_SCHEMA.clone() }
        }
    })
});

#[async_trait]
impl Resource for ModuleType {
    const KIND: ResourceKind = ResourceKind::ModuleType;
    const TABLE: &'static str = "module_types";
    const LIST_FILTERS: &'static [ListFilter] = &[ListFilter::iexact("name", "name")];

    fn schema() -> &'static Value {
        &MODULE_TYPE_SCHEMA
    }

    fn create() -> Self {
        ModuleType::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        self.schema = body.get("schema").cloned().unwrap_or_else(|| json!({}));
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(ModuleType::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(ModuleType::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(ModuleType::serialize(self))
    }
}

/// Dashboard addressed by uuid or slug
async fn find_dashboard(conn: &mut PgConnection, identifier: &str) -> Result<Dashboard, ApiError> {
    let found = match Uuid::parse_str(identifier) {
        Ok(id) => Repository::<Dashboard>::new("dashboards").find(conn, id).await?,
        _ => Dashboard::find_by_slug(conn, identifier).await?,
    };
    found.ok_or_else(|| ApiError::not_found(format!("No dashboard '{}' exists", identifier)))
}

/// `GET /dashboards`
pub async fn list(headers: HeaderMap) -> ApiResult {
    authorize(&headers, ResourceKind::Dashboard, Verb::Get, None).await?;
    let mut conn = resource::connection().await?;

    let api = &config().api;
    let dashboards: Vec<Value> = Dashboard::all_by_title(&mut conn)
        .await?
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "title": d.title,
                "url": format!("{}/dashboard/{}", api.app_root, d.slug),
                "public-url": format!("{}/performance/{}", api.public_root, d.slug),
                "published": d.published(),
            })
        })
        .collect();

    Ok(ApiResponse::json(json!({ "dashboards": dashboards })).max_age(DASHBOARD_LIST_MAX_AGE))
}

pub async fn get(headers: HeaderMap, Path(identifier): Path<String>) -> ApiResult {
    authorize(&headers, ResourceKind::Dashboard, Verb::Get, None).await?;
    let mut conn = resource::connection().await?;
    let dashboard = find_dashboard(&mut conn, &identifier).await?;
    Ok(ApiResponse::json(dashboard.serialize(&mut conn).await?))
}

/// `POST /dashboard`
pub async fn create(headers: HeaderMap, body: Bytes) -> ApiResult {
    write(headers, None, body, Verb::Post).await
}

/// `PUT /dashboard/{id or slug}`; modules missing from the body are deleted
pub async fn update(headers: HeaderMap, Path(identifier): Path<String>, body: Bytes) -> ApiResult {
    write(headers, Some(identifier), body, Verb::Put).await
}

async fn write(headers: HeaderMap, identifier: Option<String>, body: Bytes, verb: Verb) -> ApiResult {
    let user = authorize(&headers, ResourceKind::Dashboard, verb, Some(&body))
        .await?
        .unwrap_or_else(AuthUser::anonymous);
    let data = json_body(&headers, &body)?;
    validate_request(&DASHBOARD_SCHEMA, &data)?;

    let mut tx = DatabaseManager::begin().await?;
    let result = save_dashboard(&mut tx, identifier.as_deref(), &data, &user).await;
    let saved = finish(tx, result).await?;
    Ok(ApiResponse::json(saved))
}

async fn save_dashboard(
    conn: &mut PgConnection,
    identifier: Option<&str>,
    data: &Value,
    user: &AuthUser,
) -> Result<Value, ApiError> {
    let (mut dashboard, created) = match identifier {
        Some(identifier) => (find_dashboard(conn, identifier).await?, false),
        None => (Dashboard::new(), true),
    };

    if let Some(organisation) = data.get("organisation").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        if !validation::is_uuid(organisation) {
            return Err(ApiError::bad_request("Organisation must be a valid UUID"));
        }
        let id = Uuid::parse_str(organisation).map_err(|_| ApiError::bad_request("Organisation must be a valid UUID"))?;
        if Node::find(conn, id).await?.is_none() {
            return Err(ApiError::bad_request("Organisation does not exist"));
        }
        dashboard.set_organisation(conn, Some(id)).await?;
    }

    apply_fields(&mut dashboard, data)?;

    let errors = dashboard.field_errors();
    if !errors.is_empty() {
        let mut fields = validation::FieldErrors::new();
        for (field, message) in errors {
            fields.add(field, message);
        }
        return Err(ApiError::validation_error(fields.message(), Some(fields.into_map())));
    }

    dashboard.save(conn).await?;
    if created {
        repository::add_owner(conn, DASHBOARD_OWNERS, dashboard.id, &user.email).await?;
    }

    if let Some(links) = data.get("links").and_then(Value::as_array) {
        for link in links {
            let title = resource::str_field(link, "title")?;
            let url = resource::str_field(link, "url")?;
            match resource::str_field(link, "type")? {
                "transaction" => dashboard.update_transaction_link(conn, title, url).await?,
                other => dashboard.add_link(conn, title, url, other).await?,
            }
        }
    }

    if let Some(modules) = data.get("modules").and_then(Value::as_array) {
        let mut untouched: HashSet<Uuid> = dashboard.module_ids(conn).await?.into_iter().collect();
        for module_data in modules {
            for module in add_module_and_children(conn, dashboard.id, module_data, None).await? {
                untouched.remove(&module.id);
            }
        }
        let stale: Vec<Uuid> = untouched.into_iter().collect();
        let deleted = Dashboard::delete_modules(conn, &stale).await?;
        if deleted > 0 {
            info!("Removed {} modules from dashboard '{}'", deleted, dashboard.slug);
        }
    }

    Ok(dashboard.serialize(conn).await?)
}

const STRING_FIELDS: &[&str] = &[
    "slug",
    "dashboard_type",
    "page_type",
    "status",
    "title",
    "description",
    "description_extra",
    "costs",
    "other_notes",
    "customer_type",
    "business_model",
    "strapline",
    "tagline",
];

/// Copy body keys onto the dashboard, treating `-` in a key as `_`
fn apply_fields(dashboard: &mut Dashboard, data: &Value) -> Result<(), ApiError> {
    let Some(fields) = data.as_object() else {
        return Ok(());
    };
    for (key, value) in fields {
        let key = key.replace('-', "_");
        if STRING_FIELDS.contains(&key.as_str()) {
            let text = value
                .as_str()
                .ok_or_else(|| ApiError::bad_request(format!("{} must be a string", key)))?
                .to_string();
            match key.as_str() {
                "slug" => dashboard.slug = text,
                "dashboard_type" => dashboard.dashboard_type = text,
                "page_type" => dashboard.page_type = text,
                "status" => dashboard.status = text,
                "title" => dashboard.title = text,
                "description" => dashboard.description = text,
                "description_extra" => dashboard.description_extra = text,
                "costs" => dashboard.costs = text,
                "other_notes" => dashboard.other_notes = text,
                "customer_type" => dashboard.customer_type = text,
                "business_model" => dashboard.business_model = text,
                "strapline" => dashboard.strapline = text,
                _ => dashboard.tagline = text,
            }
            continue;
        }
        match key.as_str() {
            "published" => {
                let published = value
                    .as_bool()
                    .ok_or_else(|| ApiError::bad_request("published must be a boolean"))?;
                dashboard.set_published(published);
            }
            "improve_dashboard_message" => {
                dashboard.improve_dashboard_message = value
                    .as_bool()
                    .ok_or_else(|| ApiError::bad_request("improve_dashboard_message must be a boolean"))?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Add (or update, when `id` is given) the module described by `data` along with its
/// nested `modules`; returns every module touched, parent first
fn add_module_and_children<'a>(
    conn: &'a mut PgConnection,
    dashboard_id: Uuid,
    data: &'a Value,
    parent: Option<Uuid>,
) -> BoxFuture<'a, Result<Vec<Module>, ApiError>> {
    Box::pin(async move {
        let module = add_module_to_dashboard(conn, dashboard_id, data, parent).await?;
        let module_id = module.id;
        let mut touched = vec![module];
        if let Some(children) = data.get("modules").and_then(Value::as_array) {
            for child in children {
                touched.extend(add_module_and_children(conn, dashboard_id, child, Some(module_id)).await?);
            }
        }
        Ok(touched)
    })
}

async fn add_module_to_dashboard(
    conn: &mut PgConnection,
    dashboard_id: Uuid,
    data: &Value,
    parent: Option<Uuid>,
) -> Result<Module, ApiError> {
    let mut module = match data.get("id").and_then(Value::as_str) {
        Some(raw) => {
            let existing = match Uuid::parse_str(raw) {
                Ok(id) => Module::find(conn, id).await?,
                Err(_) => None,
            };
            existing
                .filter(|m| m.dashboard_id == dashboard_id)
                .ok_or_else(|| ApiError::bad_request(format!("module with id {} not found", raw)))?
        }
        None => Module::new(dashboard_id),
    };

    module.type_id = resource::uuid_field(data, "type_id")?;
    module.parent_id = parent;
    module.slug = resource::str_field(data, "slug")?.to_string();
    module.title = resource::str_field(data, "title")?.to_string();
    if let Some(description) = data.get("description").and_then(Value::as_str) {
        module.description = description.to_string();
    }
    if let Some(info) = data.get("info").and_then(Value::as_array) {
        module.info = info.iter().filter_map(Value::as_str).map(str::to_string).collect();
    }
    if let Some(options) = data.get("options") {
        module.options = options.clone();
    }
    if let Some(order) = data.get("order").and_then(Value::as_i64) {
        module.ordering = i32::try_from(order).map_err(|_| ApiError::bad_request("order is out of range"))?;
    }

    module.data_set_id = match (
        data.get("data_group").and_then(Value::as_str),
        data.get("data_type").and_then(Value::as_str),
    ) {
        (Some(group), Some(data_type)) => {
            let data_set = DataSet::find_by_group_and_type(conn, group, data_type)
                .await?
                .ok_or_else(|| {
                    ApiError::bad_request(format!(
                        "data set with data group '{}' and data type '{}' not found",
                        group, data_type
                    ))
                })?;
            Some(data_set.id)
        }
        (None, None) => None,
        _ => return Err(ApiError::bad_request("data_group and data_type must be given together")),
    };
    module.query_parameters = data.get("query_parameters").filter(|q| !q.is_null()).cloned();

    module.validate(conn).await?;
    module.save(conn).await?;
    Ok(module)
}

/// `GET /dashboard/{id}/module`; top level modules with their children nested
pub async fn list_modules(headers: HeaderMap, Path(identifier): Path<String>) -> ApiResult {
    authorize(&headers, ResourceKind::Module, Verb::Get, None).await?;
    let mut conn = resource::connection().await?;
    let dashboard = find_dashboard(&mut conn, &identifier).await?;

    let mut modules = vec![];
    for module in Module::children(&mut conn, dashboard.id, None).await? {
        modules.push(module.serialize(&mut conn).await?);
    }
    Ok(ApiResponse::json(Value::Array(modules)))
}

/// `POST /dashboard/{id}/module`
pub async fn add_module(headers: HeaderMap, Path(identifier): Path<String>, body: Bytes) -> ApiResult {
    authorize(&headers, ResourceKind::Module, Verb::Post, Some(&body)).await?;
    let data = json_body(&headers, &body)?;
    validate_request(&MODULE_SCHEMA, &data)?;

    let mut tx = DatabaseManager::begin().await?;
    let result = add_module_in(&mut tx, &identifier, &data).await;
    let saved = finish(tx, result).await?;
    Ok(ApiResponse::json(saved))
}

async fn add_module_in(conn: &mut PgConnection, identifier: &str, data: &Value) -> Result<Value, ApiError> {
    let dashboard = find_dashboard(conn, identifier).await?;
    let mut touched = add_module_and_children(conn, dashboard.id, data, None).await?;
    let module = touched.remove(0);
    Ok(module.serialize(conn).await?)
}

/// `GET /public/dashboards[?slug=dashboard/module/tab]`
pub async fn spotlight(Query(params): Query<Params>) -> ApiResult {
    let mut conn = resource::connection().await?;

    let Some(request_slug) = params.get("slug").filter(|s| !s.is_empty()) else {
        let mut items = vec![];
        for dashboard in Dashboard::all_published(&mut conn).await? {
            items.push(dashboard.spotlightify_for_list(&mut conn).await?);
        }
        return Ok(ApiResponse::json(json!({ "page-type": "browse", "items": items }))
            .max_age(SPOTLIGHT_MAX_AGE)
            .public());
    };

    let not_found = || {
        let message = format!("No dashboard with slug '{}' exists", request_slug);
        warn!("{}", message);
        ApiError::not_found(message)
    };

    let started = Instant::now();
    let dashboard_slug = request_slug.split('/').next().unwrap_or_default();
    let dashboard = Dashboard::find_by_slug(&mut conn, dashboard_slug).await?.ok_or_else(not_found)?;
    let elapsed = started.elapsed().as_secs_f64();
    info!(elapsed_time = elapsed, "fetching dashboard took {}", elapsed);

    let document = dashboard
        .spotlightify(&mut conn, Some(request_slug.as_str()))
        .await?
        .ok_or_else(not_found)?;
    let elapsed = started.elapsed().as_secs_f64();
    info!(elapsed_time = elapsed, "spotlightifying dashboard took {}", elapsed);

    let response = ApiResponse::json(document).public();
    Ok(if dashboard.published() { response.max_age(SPOTLIGHT_MAX_AGE) } else { response })
}

/// `GET /transactions-explorer-service/{id}/dashboard`
pub async fn by_transaction(Path(identifier): Path<String>) -> ApiResult {
    let mut conn = resource::connection().await?;
    let mut dashboards = vec![];
    for dashboard in Dashboard::by_tx_id(&mut conn, &identifier).await? {
        dashboards.push(dashboard.serialize(&mut conn).await?);
    }
    Ok(ApiResponse::json(Value::Array(dashboards)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_keys_set_dashboard_fields() {
        let mut dashboard = Dashboard::new();
        let data = json!({
            "slug": "carers-allowance",
            "title": "Carer's Allowance",
            "description-extra": "More text",
            "page-type": "dashboard",
            "published": true,
            "improve-dashboard-message": false,
            "organisation": "ignored here",
            "links": []
        });
        apply_fields(&mut dashboard, &data).unwrap();
        assert_eq!(dashboard.slug, "carers-allowance");
        assert_eq!(dashboard.description_extra, "More text");
        assert!(dashboard.published());
        assert!(!dashboard.improve_dashboard_message);
    }

    #[test]
    fn non_string_field_is_rejected() {
        let mut dashboard = Dashboard::new();
        let err = apply_fields(&mut dashboard, &json!({ "title": 12 })).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message(), "title must be a string");
    }

    #[test]
    fn module_body_requires_type_slug_and_title() {
        let ok = json!({
            "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f",
            "slug": "a-module",
            "title": "Some module",
            "options": { "thing": "a value" },
            "order": 1
        });
        assert!(validate_request(&MODULE_SCHEMA, &ok).is_ok());

        let mut no_type = ok.clone();
        no_type.as_object_mut().unwrap().remove("type_id");
        assert!(validate_request(&MODULE_SCHEMA, &no_type).is_err());

        let mut bad_slug = ok.clone();
        bad_slug["slug"] = json!("A Module");
        assert!(validate_request(&MODULE_SCHEMA, &bad_slug).is_err());
    }

    #[test]
    fn dashboard_links_need_a_known_type() {
        let ok = json!({ "links": [{ "title": "Apply", "url": "https://gov.uk/apply", "type": "transaction" }] });
        assert!(validate_request(&DASHBOARD_SCHEMA, &ok).is_ok());
        let bad = json!({ "links": [{ "title": "Apply", "url": "https://gov.uk/apply", "type": "mystery" }] });
        assert!(validate_request(&DASHBOARD_SCHEMA, &bad).is_err());
    }

    #[test]
    fn module_type_body_needs_name_and_schema() {
        assert!(validate_request(ModuleType::schema(), &json!({ "name": "kpi", "schema": {} })).is_ok());
        assert!(validate_request(ModuleType::schema(), &json!({ "name": "kpi" })).is_err());
        assert!(validate_request(ModuleType::schema(), &json!({ "schema": {} })).is_err());
    }
}
