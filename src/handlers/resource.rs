//! Generic list / get / sub-resource / post / put endpoints.
//!
//! Each resource implements [`Resource`]; the handlers in this module take care of
//! permission checks, request parsing, schema validation, ownership and transactions.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{header, HeaderMap},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::{pool::PoolConnection, postgres::PgRow, FromRow, PgConnection, Postgres};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{authorize, AuthUser};
use crate::database::{finish, repository, DatabaseError, DatabaseManager, Repository};
use crate::error::ApiError;
use crate::filter::{Filter, ListFilter, OwnerTable, SortDirection};
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{ResourceKind, Verb};
use crate::validation::{self, validate_request};

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").expect("valid name regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,4}$").expect("valid email regex"));

pub type Params = HashMap<String, String>;

/// How a path segment identifies a model; the first matching field wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    Uuid,
    Name(&'static str),
    Email(&'static str),
}

impl IdField {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            IdField::Uuid => validation::is_uuid(value),
            IdField::Name(_) => NAME_RE.is_match(value),
            IdField::Email(_) => EMAIL_RE.is_match(value),
        }
    }
}

#[async_trait]
pub trait Resource: for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin + Sized + 'static {
    const KIND: ResourceKind;
    const TABLE: &'static str;
    const ID_FIELDS: &'static [IdField] = &[IdField::Uuid];
    const LIST_FILTERS: &'static [ListFilter] = &[];
    /// Join table restricting non-admin users to the models they own
    const OWNERS: Option<OwnerTable> = None;

    /// Request body schema for POST and PUT
    fn schema() -> &'static Value;

    fn create() -> Self;

    fn id(&self) -> Uuid;

    /// Copy the request body onto the model, resolving references
    async fn update(&mut self, conn: &mut PgConnection, body: &Value, created: bool) -> Result<(), ApiError>;

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(())
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError>;

    /// Runs inside the write transaction; an error rolls the save back
    async fn after_save(&self, conn: &mut PgConnection, user: &AuthUser, created: bool) -> Result<(), ApiError> {
        if let (Some(owners), true) = (Self::OWNERS, created) {
            repository::add_owner(conn, owners, self.id(), &user.email).await?;
        }
        Ok(())
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError>;

    /// `None` for an unknown sub-resource, `Some(Value::Null)` when it has nothing to show
    async fn sub_resource(&self, _conn: &mut PgConnection, _name: &str, _params: &Params) -> Result<Option<Value>, ApiError> {
        Ok(None)
    }
}

pub async fn connection() -> Result<PoolConnection<Postgres>, ApiError> {
    let conn = DatabaseManager::pool()?.acquire().await.map_err(DatabaseError::from)?;
    Ok(conn)
}

/// Parse a JSON request body, insisting on an `application/json` content type
pub fn json_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("application/json") {
        return Err(ApiError::unsupported_media_type("bad content type"));
    }
    serde_json::from_slice(body).map_err(|_| ApiError::invalid_json("bad json"))
}

/// Look the model up by the first id field matching `id`
pub async fn lookup<R: Resource>(conn: &mut PgConnection, id: &str) -> Result<Option<R>, ApiError> {
    let repo = Repository::<R>::new(R::TABLE);
    let Some(field) = R::ID_FIELDS.iter().find(|f| f.matches(id)) else {
        return Ok(None);
    };
    let found = match field {
        IdField::Uuid => match Uuid::parse_str(id) {
            Ok(uuid) => repo.find(conn, uuid).await?,
            Err(_) => None,
        },
        IdField::Name(column) | IdField::Email(column) => repo.find_by(conn, column, id).await?,
    };
    Ok(found)
}

async fn visible_to<R: Resource>(conn: &mut PgConnection, model: &R, user: Option<&AuthUser>) -> Result<bool, ApiError> {
    match (R::OWNERS, user) {
        (Some(owners), Some(user)) if !user.is_admin() => {
            Ok(repository::is_owner(conn, owners, model.id(), &user.email).await?)
        }
        _ => Ok(true),
    }
}

/// Model addressed by `id`, hidden from non-admin users who do not own it
pub async fn by_id<R: Resource>(conn: &mut PgConnection, id: &str, user: Option<&AuthUser>) -> Result<R, ApiError> {
    let model = lookup::<R>(conn, id)
        .await?
        .ok_or_else(|| ApiError::not_found("resource not found"))?;
    if !visible_to(conn, &model, user).await? {
        warn!(
            "Unauthorized access to '{}' by '{}'",
            id,
            user.map(|u| u.email.as_str()).unwrap_or_default()
        );
        return Err(ApiError::not_found("resource not found"));
    }
    Ok(model)
}

/// Filtered, owner-restricted models in creation order
pub async fn list_models<R: Resource>(
    conn: &mut PgConnection,
    params: &Params,
    user: Option<&AuthUser>,
) -> Result<Vec<R>, ApiError> {
    let repo = Repository::<R>::new(R::TABLE);
    let mut filter = repo.filter()?;
    filter.list_filters(R::LIST_FILTERS, params)?;
    if let (Some(owners), Some(user)) = (R::OWNERS, user) {
        if !user.is_admin() {
            filter.owned_by(owners, &user.email)?;
        }
    }
    creation_order(&mut filter);
    Ok(repo.select_any(conn, filter).await?)
}

/// Oldest first; `id` breaks ties between rows created in the same instant
fn creation_order(filter: &mut Filter) {
    filter.order("created", SortDirection::Asc).order("id", SortDirection::Asc);
}

pub async fn serialize_all<R: Resource>(conn: &mut PgConnection, models: &[R]) -> Result<Value, ApiError> {
    let mut items = Vec::with_capacity(models.len());
    for model in models {
        items.push(model.serialize(conn).await?);
    }
    Ok(Value::Array(items))
}

pub async fn list<R: Resource>(headers: HeaderMap, Query(params): Query<Params>) -> ApiResult {
    let user = authorize(&headers, R::KIND, Verb::Get, None).await?;
    let mut conn = connection().await?;
    let models = list_models::<R>(&mut conn, &params, user.as_ref()).await?;
    Ok(ApiResponse::json(serialize_all(&mut conn, &models).await?))
}

pub async fn get<R: Resource>(headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    let user = authorize(&headers, R::KIND, Verb::Get, None).await?;
    let mut conn = connection().await?;
    let model = by_id::<R>(&mut conn, &id, user.as_ref()).await?;
    Ok(ApiResponse::json(model.serialize(&mut conn).await?))
}

pub async fn sub<R: Resource>(
    headers: HeaderMap,
    Path((id, sub_resource)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> ApiResult {
    let user = authorize(&headers, R::KIND, Verb::Get, None).await?;
    let mut conn = connection().await?;
    let model = by_id::<R>(&mut conn, &id, user.as_ref()).await?;

    let name = sub_resource.trim().to_lowercase();
    match model.sub_resource(&mut conn, &name, &params).await? {
        None => Err(ApiError::not_found("sub resource not found")),
        Some(Value::Null) => Err(ApiError::not_found("sub resources not found")),
        Some(found) => Ok(ApiResponse::json(found)),
    }
}

pub async fn post<R: Resource>(headers: HeaderMap, body: Bytes) -> ApiResult {
    write::<R>(headers, None, body, Verb::Post).await
}

pub async fn put<R: Resource>(headers: HeaderMap, Path(id): Path<String>, body: Bytes) -> ApiResult {
    write::<R>(headers, Some(id), body, Verb::Put).await
}

async fn write<R: Resource>(headers: HeaderMap, path_id: Option<String>, body: Bytes, verb: Verb) -> ApiResult {
    let user = authorize(&headers, R::KIND, verb, Some(&body))
        .await?
        .unwrap_or_else(AuthUser::anonymous);
    let body = json_body(&headers, &body)?;
    validate_request(R::schema(), &body)?;

    let mut tx = DatabaseManager::begin().await?;
    let result = save_from_json::<R>(&mut tx, path_id.as_deref(), &body, &user).await;
    let saved = finish(tx, result).await?;
    Ok(ApiResponse::json(saved))
}

/// Resolve, update, validate, save and serialize a model from a validated request body
pub async fn save_from_json<R: Resource>(
    conn: &mut PgConnection,
    path_id: Option<&str>,
    body: &Value,
    user: &AuthUser,
) -> Result<Value, ApiError> {
    let (mut model, created) = resolve_model::<R>(conn, path_id, body, user).await?;
    model.update(conn, body, created).await?;
    model.validate(conn, user).await?;
    model.save(conn).await?;
    model.after_save(conn, user, created).await?;
    debug!("Saved {} {}", R::KIND.name(), model.id());
    model.serialize(conn).await
}

/// The model addressed by the path, else the one named by the body's `id`, else a new one
async fn resolve_model<R: Resource>(
    conn: &mut PgConnection,
    path_id: Option<&str>,
    body: &Value,
    user: &AuthUser,
) -> Result<(R, bool), ApiError> {
    if let Some(id) = path_id {
        return Ok((by_id::<R>(conn, id, Some(user)).await?, false));
    }
    match body.get("id").and_then(Value::as_str) {
        Some(id) => match lookup::<R>(conn, id).await? {
            Some(model) if visible_to(conn, &model, Some(user)).await? => Ok((model, false)),
            _ => Err(ApiError::bad_request(format!("model with id {} not found", id))),
        },
        None => Ok((R::create(), true)),
    }
}

/// Required string field of an already schema-checked body
pub fn str_field<'a>(body: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", key)))
}

/// Required uuid field of an already schema-checked body
pub fn uuid_field(body: &Value, key: &str) -> Result<Uuid, ApiError> {
    let raw = str_field(body, key)?;
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("{} has to be a uuid", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_fields_match_their_formats() {
        assert!(IdField::Uuid.matches("7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f"));
        assert!(!IdField::Uuid.matches("lpa_volumes"));
        assert!(IdField::Name("name").matches("lpa_volumes"));
        assert!(IdField::Name("name").matches("google-analytics"));
        assert!(!IdField::Name("name").matches("two words"));
        assert!(IdField::Email("email").matches("some.one@digital.cabinet-office.gov.uk"));
        assert!(!IdField::Email("email").matches("nobody"));
    }

    #[test]
    fn lists_are_ordered_by_creation() {
        let mut filter = Filter::new("data_groups").unwrap();
        creation_order(&mut filter);
        assert_eq!(
            filter.to_sql().unwrap().query,
            "SELECT * FROM \"data_groups\" WHERE 1=1 ORDER BY \"created\" ASC, \"id\" ASC"
        );
    }

    #[test]
    fn json_body_requires_json_content_type() {
        let mut headers = HeaderMap::new();
        let err = json_body(&headers, b"{}").unwrap_err();
        assert_eq!(err.status_code(), 415);
        assert_eq!(err.message(), "bad content type");

        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert_eq!(json_body(&headers, br#"{"a":1}"#).unwrap()["a"], 1);

        let err = json_body(&headers, b"not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message(), "bad json");
    }

    #[test]
    fn body_fields_are_extracted() {
        let body = serde_json::json!({ "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f", "name": "x" });
        assert_eq!(str_field(&body, "name").unwrap(), "x");
        assert!(uuid_field(&body, "type_id").is_ok());
        assert!(uuid_field(&body, "name").is_err());
        assert_eq!(str_field(&body, "missing").unwrap_err().message(), "missing is required");
    }
}
