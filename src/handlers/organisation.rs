use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::collectors::slugify;
use crate::database::models::{Node, NodeType};
use crate::database::Repository;
use crate::error::ApiError;
use crate::filter::ListFilter;
use crate::handlers::resource::{self, Params, Resource};
use crate::types::ResourceKind;

static NODE_TYPE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" }
        },
        "required": ["name"],
        "additionalProperties": false
    })
});

static NODE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "type_id": { "type": "string", "format": "uuid" },
            "parent_id": { "type": "string", "format": "uuid" },
            "name": { "type": "string" },
            "abbreviation": { "type": "string" }
        },
        "required": ["type_id", "name"],
        "additionalProperties": false
    })
});

#[async_trait]
impl Resource for NodeType {
    const KIND: ResourceKind = ResourceKind::NodeType;
    const TABLE: &'static str = "node_types";
    const LIST_FILTERS: &'static [ListFilter] = &[ListFilter::iexact("name", "name")];

    fn schema() -> &'static Value {
        &NODE_TYPE_SCHEMA
    }

    fn create() -> Self {
        NodeType::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.name = resource::str_field(body, "name")?.to_string();
        Ok(())
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(NodeType::save(self, conn).await?)
    }

    async fn serialize(&self, _conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(json!({ "id": self.id, "name": self.name }))
    }
}

#[async_trait]
impl Resource for Node {
    const KIND: ResourceKind = ResourceKind::Node;
    const TABLE: &'static str = "nodes";
    const LIST_FILTERS: &'static [ListFilter] = &[
        ListFilter::iexact("name", "name"),
        ListFilter::iexact("abbreviation", "abbreviation"),
    ];

    fn schema() -> &'static Value {
        &NODE_SCHEMA
    }

    fn create() -> Self {
        Node::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        let type_id = resource::uuid_field(body, "type_id")?;
        let node_type = Repository::<NodeType>::new("node_types")
            .find(conn, type_id)
            .await?
            .ok_or_else(|| ApiError::bad_request("no NodeType found"))?;

        if body.get("parent_id").is_some() {
            let parent_id = resource::uuid_field(body, "parent_id")
                .map_err(|_| ApiError::bad_request("parent_id has to be a uuid"))?;
            if Node::find(conn, parent_id).await?.is_none() {
                return Err(ApiError::bad_request("parent not found"));
            }
            self.pending_parent = Some(parent_id);
        }

        self.name = resource::str_field(body, "name")?.to_string();
        self.abbreviation = body.get("abbreviation").and_then(Value::as_str).map(str::to_string);
        self.node_type_id = node_type.id;
        if self.slug.is_empty() {
            self.slug = slugify(self.abbreviation.as_deref().unwrap_or(&self.name));
        }
        Ok(())
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(Node::save(self, conn).await?)
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(Node::serialize_by_id(conn, self.id).await?)
    }

    /// `ancestors`, root first; `?self=true` appends the node itself
    async fn sub_resource(&self, conn: &mut PgConnection, name: &str, params: &Params) -> Result<Option<Value>, ApiError> {
        if name != "ancestors" {
            return Ok(None);
        }
        let include_self = params.get("self").map(String::as_str) == Some("true");
        let mut ancestors = vec![];
        for node in Node::ancestors(conn, self.id, include_self).await? {
            ancestors.push(Node::serialize_by_id(conn, node.id).await?);
        }
        Ok(Some(Value::Array(ancestors)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_request;

    #[test]
    fn node_body_needs_uuid_type_and_parent() {
        let ok = json!({ "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f", "name": "Cabinet Office" });
        assert!(validate_request(Node::schema(), &ok).is_ok());

        let bad_type = json!({ "type_id": "department", "name": "Cabinet Office" });
        assert!(validate_request(Node::schema(), &bad_type).is_err());

        let bad_parent = json!({
            "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f",
            "parent_id": "nope",
            "name": "Cabinet Office"
        });
        assert!(validate_request(Node::schema(), &bad_parent).is_err());
    }
}
