use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::transforms::resolve_data_reference;
use crate::database::models::{Transform, TransformType};
use crate::database::Repository;
use crate::error::ApiError;
use crate::filter::OwnerTable;
use crate::handlers::resource::{self, Resource};
use crate::types::ResourceKind;

static TRANSFORM_TYPE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "maxLength": 25 },
            "function": { "type": "string", "format": "function_name" },
            "schema": { "type": "object" }
        },
        "required": ["name", "function", "schema"],
        "additionalProperties": false
    })
});

static DATA_REFERENCE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "data-group": { "type": "string", "format": "slug" },
            "data-type": { "type": "string", "format": "slug" }
        },
        "required": ["data-type"],
        "additionalProperties": false
    })
});

static TRANSFORM_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "type_id": { "type": "string", "format": "uuid" },
            "input": DATA_REFERENCE_SCHEMA.clone(),
            "query-parameters": { "type": "object" },
            "options": { "type": "object" },
            "output": DATA_REFERENCE_SCHEMA.clone()
        },
        "required": ["type_id", "input", "query-parameters", "options", "output"],
        "additionalProperties": false
    })
});

#[async_trait]
impl Resource for TransformType {
    const KIND: ResourceKind = ResourceKind::TransformType;
    const TABLE: &'static str = "transform_types";

    fn schema() -> &'static Value {
        &TRANSFORM_TYPE_SCHEMA
    }

    fn create() -> Self {
        TransformType::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        self.function = resource::str_field(body, "function")?.to_string();
        self.schema = body.get("schema").cloned().unwrap_or_else(|| json!({}));
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(TransformType::validate(self)?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(TransformType::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(TransformType::serialize(self))
    }
}

#[async_trait]
impl Resource for Transform {
    const KIND: ResourceKind = ResourceKind::Transform;
    const TABLE: &'static str = "transforms";
    const OWNERS: Option<OwnerTable> = Some(OwnerTable { table: "transform_owners", column: "transform_id" });

    fn schema() -> &'static Value {
        &TRANSFORM_SCHEMA
    }

    fn create() -> Self {
        Transform::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        let type_id = resource::uuid_field(body, "type_id")?;
        let transform_type = Repository::<TransformType>::new("transform_types")
            .find(conn, type_id)
            .await?
            .ok_or_else(|| ApiError::bad_request("transform type was not found"))?;

        let (input_group, input_type) = resolve_data_reference(conn, &body["input"]).await?;
        let input_type =
            input_type.ok_or_else(|| ApiError::bad_request("input requires at least a data-type (that exists)"))?;
        let (output_group, output_type) = resolve_data_reference(conn, &body["output"]).await?;
        let output_type =
            output_type.ok_or_else(|| ApiError::bad_request("output requires at least a data-type (that exists)"))?;

        self.type_id = transform_type.id;
        self.input_group_id = input_group;
        self.input_type_id = input_type;
        self.query_parameters = body.get("query-parameters").cloned().unwrap_or_else(|| json!({}));
        self.options = body.get("options").cloned().unwrap_or_else(|| json!({}));
        self.output_group_id = output_group;
        self.output_type_id = output_type;
        Ok(())
    }

    async fn validate(&mut self, conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        Ok(Transform::validate(self, conn).await?)
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(Transform::save(self, conn).await?)
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(Transform::serialize(self, conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_request;

    fn transform_body() -> Value {
        json!({
            "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f",
            "input": { "data-group": "lpa", "data-type": "volumes" },
            "query-parameters": {},
            "options": {},
            "output": { "data-type": "volumes-weekly" }
        })
    }

    #[test]
    fn transform_body_is_validated() {
        assert!(validate_request(Transform::schema(), &transform_body()).is_ok());

        let mut no_output_type = transform_body();
        no_output_type["output"] = json!({ "data-group": "lpa" });
        assert!(validate_request(Transform::schema(), &no_output_type).is_err());

        let mut bad_slug = transform_body();
        bad_slug["input"]["data-type"] = json!("Volumes Weekly");
        assert!(validate_request(Transform::schema(), &bad_slug).is_err());
    }

    #[test]
    fn transform_type_function_format_is_checked() {
        let ok = json!({ "name": "rate", "function": "backdrop.transformers.tasks.rate", "schema": {} });
        assert!(validate_request(TransformType::schema(), &ok).is_ok());
        let bad = json!({ "name": "rate", "function": "Rate!", "schema": {} });
        assert!(validate_request(TransformType::schema(), &bad).is_err());
    }
}
