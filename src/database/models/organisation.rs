use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeType {
    pub id: Uuid,
    pub name: String,
}

impl NodeType {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new() }
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO node_types (id, name) VALUES ($1, $2)
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
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub abbreviation: Option<String>,
    pub slug: String,
    pub node_type_id: Uuid,
    /// Parent to link once the node itself is saved
    #[sqlx(skip)]
    #[serde(skip)]
    pub pending_parent: Option<Uuid>,
}

/// A node joined with the name of its type
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TypedNode {
    pub id: Uuid,
    pub name: String,
    pub abbreviation: Option<String>,
    pub slug: String,
    pub node_type_id: Uuid,
    pub type_name: String,
}

impl TypedNode {
    /// `{abbr, title}` as shown on public dashboards
    pub fn spotlightify(&self) -> serde_json::Value {
        serde_json::json!({
            "abbr": self.abbreviation.as_deref().unwrap_or(&self.name),
            "title": self.name,
        })
    }

    /// `{id, type, name, abbreviation}` plus `parent` when given
    pub fn serialize(&self, parent: Option<serde_json::Value>) -> serde_json::Value {
        let mut node = serde_json::json!({
            "id": self.id,
            "type": { "id": self.node_type_id, "name": self.type_name },
            "name": self.name,
            "abbreviation": self.abbreviation.as_deref().unwrap_or(&self.name),
        });
        if let Some(parent) = parent {
            node["parent"] = parent;
        }
        node
    }
}

impl Node {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            abbreviation: None,
            slug: String::new(),
            node_type_id: Uuid::nil(),
            pending_parent: None,
        }
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<Node>, DatabaseError> {
        let row = sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO nodes (id, name, abbreviation, slug, node_type_id) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name,
               abbreviation = EXCLUDED.abbreviation,
               slug = EXCLUDED.slug,
               node_type_id = EXCLUDED.node_type_id",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.abbreviation)
        .bind(&self.slug)
        .bind(self.node_type_id)
        .execute(&mut *conn)
        .await?;
        if let Some(parent_id) = self.pending_parent {
            self.add_parent(conn, parent_id).await?;
        }
        Ok(())
    }

    pub async fn add_parent(&self, conn: &mut PgConnection, parent_id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO node_parents (from_node_id, to_node_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(self.id)
            .bind(parent_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn node_type(&self, conn: &mut PgConnection) -> Result<NodeType, DatabaseError> {
        let row = sqlx::query_as::<_, NodeType>("SELECT * FROM node_types WHERE id = $1")
            .bind(self.node_type_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn typed(conn: &mut PgConnection, id: Uuid) -> Result<Option<TypedNode>, DatabaseError> {
        let row = sqlx::query_as::<_, TypedNode>(
            "SELECT n.*, t.name AS type_name FROM nodes n JOIN node_types t ON t.id = n.node_type_id WHERE n.id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Node document with its first parent resolved one level deep; `null` when missing
    pub async fn serialize_by_id(conn: &mut PgConnection, id: Uuid) -> Result<serde_json::Value, DatabaseError> {
        let Some(node) = Self::typed(conn, id).await? else {
            return Ok(serde_json::Value::Null);
        };
        let parent_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT p.to_node_id FROM node_parents p JOIN nodes n ON n.id = p.to_node_id
             WHERE p.from_node_id = $1 ORDER BY n.name LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        let parent = match parent_id {
            Some(pid) => Self::typed(conn, pid).await?.map(|p| p.serialize(None)),
            None => None,
        };
        Ok(node.serialize(Some(parent.unwrap_or(serde_json::Value::Null))))
    }

    /// Every ancestor, root first; the node itself comes last when `include_self` is set
    pub async fn ancestors(
        conn: &mut PgConnection,
        id: Uuid,
        include_self: bool,
    ) -> Result<Vec<TypedNode>, DatabaseError> {
        let initial = if include_self {
            "SELECT NULL::uuid AS node_from, $1::uuid AS node_to, 0 AS depth"
        } else {
            "SELECT p.from_node_id AS node_from, p.to_node_id AS node_to, 0 AS depth
             FROM node_parents p WHERE p.from_node_id = $1"
        };
        let query = format!(
            "WITH RECURSIVE node_ancestors(node_from, node_to, depth) AS (
                {}
              UNION ALL
                SELECT p.from_node_id, p.to_node_id, a.depth + 1
                FROM node_parents p JOIN node_ancestors a ON p.from_node_id = a.node_to
             )
             SELECT n.*, t.name AS type_name
             FROM node_ancestors a
               JOIN nodes n ON n.id = a.node_to
               JOIN node_types t ON t.id = n.node_type_id
             ORDER BY a.depth DESC",
            initial
        );
        let rows = sqlx::query_as::<_, TypedNode>(&query)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(name: &str, abbreviation: Option<&str>) -> TypedNode {
        TypedNode {
            id: Uuid::new_v4(),
            name: name.to_string(),
            abbreviation: abbreviation.map(str::to_string),
            slug: String::new(),
            node_type_id: Uuid::new_v4(),
            type_name: "department".to_string(),
        }
    }

    #[test]
    fn spotlight_abbreviation_falls_back_to_name() {
        assert_eq!(typed("Cabinet Office", Some("CO")).spotlightify()["abbr"], "CO");
        assert_eq!(typed("HM Treasury", None).spotlightify()["abbr"], "HM Treasury");
    }

    #[test]
    fn serialize_includes_parent_only_when_resolved() {
        let child = typed("Student Loans Company", Some("SLC"));
        let parent = typed("Department for Education", None);
        let doc = child.serialize(Some(parent.serialize(None)));
        assert_eq!(doc["type"]["name"], "department");
        assert_eq!(doc["parent"]["abbreviation"], "Department for Education");
        assert!(doc["parent"].get("parent").is_none());
        assert!(child.serialize(None).get("parent").is_none());
    }
}
