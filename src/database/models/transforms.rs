use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::validation::{self, ValidationError, QUERY_PARAM_SCHEMA};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransformType {
    pub id: Uuid,
    pub name: String,
    pub schema: Value,
    pub function: String,
}

impl TransformType {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new(), schema: json!({}), function: String::new() }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !validation::is_function_name(&self.function) {
            return Err(ValidationError::Model(
                "Transform function has to consist of lowercase letters, underscores or dots".to_string(),
            ));
        }
        validation::check_schema(&self.schema)
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO transform_types (id, name, schema, function) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name, schema = EXCLUDED.schema, function = EXCLUDED.function",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.schema)
        .bind(&self.function)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub fn serialize(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "schema": self.schema,
            "function": self.function,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transform {
    pub id: Uuid,
    pub type_id: Uuid,
    pub input_group_id: Option<Uuid>,
    pub input_type_id: Uuid,
    pub query_parameters: Value,
    pub options: Value,
    pub output_group_id: Option<Uuid>,
    pub output_type_id: Uuid,
}

/// Group and type names on one side of a transform
#[derive(Debug, Clone, PartialEq)]
pub struct DataReference {
    pub group: Option<String>,
    pub data_type: String,
}

impl DataReference {
    pub fn serialize(&self) -> Value {
        let mut out = json!({ "data-type": self.data_type });
        if let Some(group) = &self.group {
            out["data-group"] = json!(group);
        }
        out
    }
}

impl Transform {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            type_id: Uuid::nil(),
            input_group_id: None,
            input_type_id: Uuid::nil(),
            query_parameters: json!({}),
            options: json!({}),
            output_group_id: None,
            output_type_id: Uuid::nil(),
        }
    }

    pub async fn transform_type(&self, conn: &mut PgConnection) -> Result<TransformType, DatabaseError> {
        let row = sqlx::query_as::<_, TransformType>("SELECT * FROM transform_types WHERE id = $1")
            .bind(self.type_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Query parameters must match the shared schema and options the transform type's schema
    pub async fn validate(&self, conn: &mut PgConnection) -> Result<(), ValidationError> {
        validation::validate_against(&QUERY_PARAM_SCHEMA, &self.query_parameters)
            .map_err(|e| ValidationError::Model(format!("query parameters are invalid: {}", e)))?;

        let transform_type = self
            .transform_type(conn)
            .await
            .map_err(|e| ValidationError::Model(e.to_string()))?;
        validation::validate_against(&transform_type.schema, &self.options)
            .map_err(|e| ValidationError::Model(format!("options are invalid: {}", e)))
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO transforms (
                id, type_id, input_group_id, input_type_id, query_parameters, options,
                output_group_id, output_type_id
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                type_id = EXCLUDED.type_id,
                input_group_id = EXCLUDED.input_group_id,
                input_type_id = EXCLUDED.input_type_id,
                query_parameters = EXCLUDED.query_parameters,
                options = EXCLUDED.options,
                output_group_id = EXCLUDED.output_group_id,
                output_type_id = EXCLUDED.output_type_id",
        )
        .bind(self.id)
        .bind(self.type_id)
        .bind(self.input_group_id)
        .bind(self.input_type_id)
        .bind(&self.query_parameters)
        .bind(&self.options)
        .bind(self.output_group_id)
        .bind(self.output_type_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let transform_type = self.transform_type(conn).await?;
        let input = resolve_ids(conn, self.input_group_id, self.input_type_id).await?;
        let output = resolve_ids(conn, self.output_group_id, self.output_type_id).await?;
        Ok(json!({
            "id": self.id,
            "type": { "id": transform_type.id, "function": transform_type.function },
            "input": input.serialize(),
            "query-parameters": self.query_parameters,
            "options": self.options,
            "output": output.serialize(),
        }))
    }
}

async fn resolve_ids(conn: &mut PgConnection, group_id: Option<Uuid>, type_id: Uuid) -> Result<DataReference, DatabaseError> {
    let type_name: String = sqlx::query_scalar("SELECT name FROM data_types WHERE id = $1")
        .bind(type_id)
        .fetch_one(&mut *conn)
        .await?;
    let group = match group_id {
        Some(id) => {
            let name: String = sqlx::query_scalar("SELECT name FROM data_groups WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
            Some(name)
        }
        None => None,
    };
    Ok(DataReference { group, data_type: type_name })
}

/// Look up `{"data-group"?, "data-type"?}` by name; unknown names resolve to `None`
pub async fn resolve_data_reference(
    conn: &mut PgConnection,
    reference: &Value,
) -> Result<(Option<Uuid>, Option<Uuid>), DatabaseError> {
    let group: Option<Uuid> = match reference.get("data-group").and_then(Value::as_str) {
        Some(name) => sqlx::query_scalar("SELECT id FROM data_groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?,
        None => None,
    };
    let data_type: Option<Uuid> = match reference.get("data-type").and_then(Value::as_str) {
        Some(name) => sqlx::query_scalar("SELECT id FROM data_types WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?,
        None => None,
    };
    Ok((group, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_type_requires_dotted_function_and_valid_schema() {
        let mut t = TransformType::new();
        t.function = "backdrop.transformers.tasks.latest_transaction_explorer_values".to_string();
        t.schema = json!({ "type": "object" });
        assert!(t.validate().is_ok());

        t.function = "Not-Valid".to_string();
        assert!(t.validate().is_err());

        t.function = "valid.name".to_string();
        t.schema = json!({ "type": "banana" });
        assert!(t.validate().unwrap_err().to_string().starts_with("schema is invalid"));
    }

    #[test]
    fn data_reference_omits_missing_group() {
        let type_only = DataReference { group: None, data_type: "volumes".to_string() };
        assert_eq!(type_only.serialize(), json!({ "data-type": "volumes" }));

        let both = DataReference {
            group: Some("lpa".to_string()),
            data_type: "volumes".to_string(),
        };
        assert_eq!(both.serialize(), json!({ "data-type": "volumes", "data-group": "lpa" }));
    }
}
