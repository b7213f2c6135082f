use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::organisation::{Node, TypedNode};
use crate::validation::{self, FieldErrors, ValidationError, QUERY_PARAM_SCHEMA};

static MODULE_TYPE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_]+$").expect("valid module type name regex"));

pub const DASHBOARD_TYPES: &[&str] = &[
    "transaction",
    "high-volume-transaction",
    "service-group",
    "agency",
    "department",
    "content",
    "other",
];

pub const CUSTOMER_TYPES: &[&str] = &["", "Business", "Individuals", "Business and individuals", "Charity"];

pub const BUSINESS_MODELS: &[&str] = &[
    "",
    "Department budget",
    "Fees and charges",
    "Taxpayers",
    "Fees and charges, and taxpayers",
];

pub const STRAPLINES: &[&str] = &[
    "Dashboard",
    "Service dashboard",
    "Content dashboard",
    "Performance",
    "Policy dashboard",
    "Public sector purchasing dashboard",
    "Topic Explorer",
    "Service Explorer",
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dashboard {
    pub id: Uuid,
    pub slug: String,
    pub dashboard_type: String,
    pub page_type: String,
    pub status: String,
    pub title: String,
    pub description: String,
    pub description_extra: String,
    pub costs: String,
    pub other_notes: String,
    pub customer_type: String,
    pub business_model: String,
    pub improve_dashboard_message: bool,
    pub strapline: String,
    pub tagline: String,
    pub organisation_id: Option<Uuid>,
    pub department_cache_id: Option<Uuid>,
    pub agency_cache_id: Option<Uuid>,
    pub service_cache_id: Option<Uuid>,
    pub transaction_cache_id: Option<Uuid>,
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: String::new(),
            dashboard_type: DASHBOARD_TYPES[0].to_string(),
            page_type: "dashboard".to_string(),
            status: "unpublished".to_string(),
            title: String::new(),
            description: String::new(),
            description_extra: String::new(),
            costs: String::new(),
            other_notes: String::new(),
            customer_type: String::new(),
            business_model: String::new(),
            improve_dashboard_message: true,
            strapline: STRAPLINES[0].to_string(),
            tagline: String::new(),
            organisation_id: None,
            department_cache_id: None,
            agency_cache_id: None,
            service_cache_id: None,
            transaction_cache_id: None,
        }
    }

    pub fn published(&self) -> bool {
        self.status == "published"
    }

    pub fn set_published(&mut self, published: bool) {
        self.status = if published { "published" } else { "unpublished" }.to_string();
    }

    /// Point at `organisation` and refresh the department/agency/service/transaction caches
    pub async fn set_organisation(&mut self, conn: &mut PgConnection, organisation: Option<Uuid>) -> Result<(), DatabaseError> {
        self.organisation_id = organisation;
        self.department_cache_id = None;
        self.agency_cache_id = None;
        self.service_cache_id = None;
        self.transaction_cache_id = None;

        let Some(id) = organisation else {
            return Ok(());
        };
        for node in Node::ancestors(conn, id, true).await? {
            match node.type_name.as_str() {
                "department" => self.department_cache_id = Some(node.id),
                "agency" => self.agency_cache_id = Some(node.id),
                "service" => self.service_cache_id = Some(node.id),
                "transaction" => self.transaction_cache_id = Some(node.id),
                _ => {}
            }
        }
        Ok(())
    }

    /// Field-level checks run before save; each entry is `(field, message)`
    pub fn field_errors(&self) -> Vec<(&'static str, String)> {
        let mut errors = vec![];
        if self.slug.is_empty() {
            errors.push(("slug", "This field cannot be blank.".to_string()));
        } else if !crate::validation::is_slug(&self.slug) {
            errors.push(("slug", "Slug can only contain lower case letters, numbers or hyphens".to_string()));
        }
        if self.title.is_empty() {
            errors.push(("title", "This field cannot be blank.".to_string()));
        }
        let choices: [(&'static str, &str, &[&str]); 4] = [
            ("dashboard_type", self.dashboard_type.as_str(), DASHBOARD_TYPES),
            ("customer_type", self.customer_type.as_str(), CUSTOMER_TYPES),
            ("business_model", self.business_model.as_str(), BUSINESS_MODELS),
            ("strapline", self.strapline.as_str(), STRAPLINES),
        ];
        for (field, value, allowed) in choices {
            if !allowed.contains(&value) {
                errors.push((field, format!("Value '{}' is not a valid choice.", value)));
            }
        }
        let lengths: [(&'static str, &str, usize); 10] = [
            ("slug", self.slug.as_str(), 90),
            ("page_type", self.page_type.as_str(), 80),
            ("title", self.title.as_str(), 256),
            ("description", self.description.as_str(), 500),
            ("description_extra", self.description_extra.as_str(), 400),
            ("costs", self.costs.as_str(), 1500),
            ("other_notes", self.other_notes.as_str(), 1000),
            ("tagline", self.tagline.as_str(), 400),
            ("status", self.status.as_str(), 30),
            ("strapline", self.strapline.as_str(), 40),
        ];
        for (field, value, max) in lengths {
            let len = value.chars().count();
            if len > max {
                errors.push((
                    field,
                    format!("Ensure this value has at most {} characters (it has {}).", max, len),
                ));
            }
        }
        errors
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO dashboards (
                id, slug, dashboard_type, page_type, status, title, description, description_extra,
                costs, other_notes, customer_type, business_model, improve_dashboard_message,
                strapline, tagline, organisation_id, department_cache_id, agency_cache_id,
                service_cache_id, transaction_cache_id
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
             ON CONFLICT (id) DO UPDATE SET
                slug = EXCLUDED.slug,
                dashboard_type = EXCLUDED.dashboard_type,
                page_type = EXCLUDED.page_type,
                status = EXCLUDED.status,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                description_extra = EXCLUDED.description_extra,
                costs = EXCLUDED.costs,
                other_notes = EXCLUDED.other_notes,
                customer_type = EXCLUDED.customer_type,
                business_model = EXCLUDED.business_model,
                improve_dashboard_message = EXCLUDED.improve_dashboard_message,
                strapline = EXCLUDED.strapline,
                tagline = EXCLUDED.tagline,
                organisation_id = EXCLUDED.organisation_id,
                department_cache_id = EXCLUDED.department_cache_id,
                agency_cache_id = EXCLUDED.agency_cache_id,
                service_cache_id = EXCLUDED.service_cache_id,
                transaction_cache_id = EXCLUDED.transaction_cache_id",
        )
        .bind(self.id)
        .bind(&self.slug)
        .bind(&self.dashboard_type)
        .bind(&self.page_type)
        .bind(&self.status)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.description_extra)
        .bind(&self.costs)
        .bind(&self.other_notes)
        .bind(&self.customer_type)
        .bind(&self.business_model)
        .bind(self.improve_dashboard_message)
        .bind(&self.strapline)
        .bind(&self.tagline)
        .bind(self.organisation_id)
        .bind(self.department_cache_id)
        .bind(self.agency_cache_id)
        .bind(self.service_cache_id)
        .bind(self.transaction_cache_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_slug(conn: &mut PgConnection, slug: &str) -> Result<Option<Dashboard>, DatabaseError> {
        let row = sqlx::query_as::<_, Dashboard>("SELECT * FROM dashboards WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn all_by_title(conn: &mut PgConnection) -> Result<Vec<Dashboard>, DatabaseError> {
        let rows = sqlx::query_as::<_, Dashboard>("SELECT * FROM dashboards ORDER BY title")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    pub async fn all_published(conn: &mut PgConnection) -> Result<Vec<Dashboard>, DatabaseError> {
        let rows = sqlx::query_as::<_, Dashboard>("SELECT * FROM dashboards WHERE status = 'published' ORDER BY slug")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// Published dashboards with a module on `transactional_services_summaries` filtered by `service_id:<tx_id>`
    pub async fn by_tx_id(conn: &mut PgConnection, tx_id: &str) -> Result<Vec<Dashboard>, DatabaseError> {
        let filter = Value::String(format!("service_id:{}", tx_id));
        let rows = sqlx::query_as::<_, Dashboard>(
            "SELECT DISTINCT d.* FROM modules m
               JOIN dashboards d ON d.id = m.dashboard_id,
               jsonb_array_elements(CASE WHEN jsonb_typeof(m.query_parameters->'filter_by') = 'array'
                                         THEN m.query_parameters->'filter_by' ELSE '[]'::jsonb END) AS filters
             WHERE filters = $1
               AND m.data_set_id = (SELECT id FROM data_sets WHERE name = 'transactional_services_summaries')
               AND d.status = 'published'",
        )
        .bind(&filter)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn links(&self, conn: &mut PgConnection) -> Result<Vec<Link>, DatabaseError> {
        let rows = sqlx::query_as::<_, Link>("SELECT * FROM links WHERE dashboard_id = $1 ORDER BY link_type DESC, title")
            .bind(self.id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// Create the transaction link or update the existing one
    pub async fn update_transaction_link(&self, conn: &mut PgConnection, title: &str, url: &str) -> Result<(), DatabaseError> {
        let updated = sqlx::query("UPDATE links SET title = $2, url = $3 WHERE dashboard_id = $1 AND link_type = 'transaction'")
            .bind(self.id)
            .bind(title)
            .bind(url)
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            self.add_link(conn, title, url, "transaction").await?;
        }
        Ok(())
    }

    pub async fn add_link(&self, conn: &mut PgConnection, title: &str, url: &str, link_type: &str) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO links (id, dashboard_id, title, url, link_type) VALUES ($1, $2, $3, $4, $5)")
            .bind(Uuid::new_v4())
            .bind(self.id)
            .bind(title)
            .bind(url)
            .bind(link_type)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn module_ids(&self, conn: &mut PgConnection) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar("SELECT id FROM modules WHERE dashboard_id = $1")
            .bind(self.id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(ids)
    }

    pub async fn delete_modules(conn: &mut PgConnection, ids: &[Uuid]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM modules WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Admin representation
    pub async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let mut out = json!({
            "id": self.id,
            "slug": self.slug,
            "dashboard_type": self.dashboard_type,
            "page_type": self.page_type,
            "status": self.status,
            "title": self.title,
            "description": self.description,
            "description_extra": self.description_extra,
            "costs": self.costs,
            "other_notes": self.other_notes,
            "customer_type": self.customer_type,
            "business_model": self.business_model,
            "improve_dashboard_message": self.improve_dashboard_message,
            "strapline": self.strapline,
            "tagline": self.tagline,
            "published": self.published(),
        });

        out["organisation"] = match self.organisation_id {
            Some(id) => Node::serialize_by_id(conn, id).await?,
            None => Value::Null,
        };

        let links = self.links(conn).await?;
        out["links"] = Value::Array(links.iter().map(Link::serialize).collect());

        let mut modules = vec![];
        for module in Module::children(conn, self.id, None).await? {
            modules.push(module.serialize(conn).await?);
        }
        out["modules"] = Value::Array(modules);
        Ok(out)
    }

    fn spotlight_base(&self) -> Map<String, Value> {
        let fields = [
            ("business_model", json!(self.business_model)),
            ("costs", json!(self.costs)),
            ("customer_type", json!(self.customer_type)),
            ("dashboard_type", json!(self.dashboard_type)),
            ("description", json!(self.description)),
            ("description_extra", json!(self.description_extra)),
            ("other_notes", json!(self.other_notes)),
            ("page_type", json!(self.page_type)),
            ("published", json!(self.published())),
            ("slug", json!(self.slug)),
            ("strapline", json!(self.strapline)),
            ("tagline", json!(self.tagline)),
            ("title", json!(self.title)),
        ];
        fields.into_iter().map(|(k, v)| (k.replace('_', "-"), v)).collect()
    }

    /// Public representation; `request_slug` (`dashboard/module/tab`) narrows the modules shown
    pub async fn spotlightify(&self, conn: &mut PgConnection, request_slug: Option<&str>) -> Result<Option<Value>, DatabaseError> {
        let mut out = self.spotlight_base();

        let mut modules = vec![];
        for module in Module::children(conn, self.id, None).await? {
            modules.push(module.spotlightify(conn).await?);
        }
        out.insert("modules".to_string(), Value::Array(modules));

        let links = self.links(conn).await?;
        let mut related = Map::new();
        if let Some(link) = links.iter().find(|l| l.link_type == "transaction") {
            related.insert("transaction".to_string(), link.serialize());
        }
        related.insert(
            "other".to_string(),
            Value::Array(links.iter().filter(|l| l.link_type == "other").map(Link::serialize).collect()),
        );
        related.insert("improve-dashboard-message".to_string(), json!(self.improve_dashboard_message));
        out.insert("relatedPages".to_string(), Value::Object(related));

        let (department, agency) = self.department_and_agency(conn).await?;
        if let Some(department) = department {
            out.insert("department".to_string(), department.spotlightify());
        }
        if let Some(agency) = agency {
            out.insert("agency".to_string(), agency.spotlightify());
        }

        Ok(modules_or_tabs(request_slug, Value::Object(out)))
    }

    /// Entry in the public browse list
    pub async fn spotlightify_for_list(&self, conn: &mut PgConnection) -> Result<Value, DatabaseError> {
        let mut out = json!({
            "slug": self.slug,
            "title": self.title,
            "dashboard-type": self.dashboard_type,
        });
        let caches = [
            ("department", self.department_cache_id),
            ("agency", self.agency_cache_id),
            ("service", self.service_cache_id),
        ];
        for (key, id) in caches {
            if let Some(id) = id {
                if let Some(node) = Node::typed(conn, id).await? {
                    out[key] = node.spotlightify();
                }
            }
        }
        Ok(out)
    }

    /// The agency is the organisation itself or its nearest agency ancestor; the department
    /// is searched above the agency when there is one
    async fn department_and_agency(&self, conn: &mut PgConnection) -> Result<(Option<TypedNode>, Option<TypedNode>), DatabaseError> {
        let Some(org) = self.organisation_id else {
            return Ok((None, None));
        };
        let lineage = Node::ancestors(conn, org, true).await?;
        let agency_at = lineage.iter().rposition(|n| n.type_name == "agency");
        let department = match agency_at {
            Some(i) => lineage[..i].iter().rev().find(|n| n.type_name == "department"),
            None => lineage.iter().rev().find(|n| n.type_name == "department"),
        };
        let agency = agency_at.map(|i| lineage[i].clone());
        Ok((department.cloned(), agency))
    }
}

/// Narrow a spotlight dashboard document to the module (or tab) addressed by `request_slug`
pub fn modules_or_tabs(request_slug: Option<&str>, mut dashboard: Value) -> Option<Value> {
    let Some(request_slug) = request_slug else {
        return Some(dashboard);
    };
    let dashboard_slug = dashboard["slug"].as_str().unwrap_or_default().to_string();
    let remainder = request_slug.replacen(&dashboard_slug, "", 1);
    let module_slugs: Vec<&str> = remainder.split('/').skip(1).collect();
    if module_slugs.is_empty() {
        return Some(dashboard);
    }

    let mut modules = dashboard.get("modules")?.as_array()?.clone();
    let last_slug = module_slugs[module_slugs.len() - 1];
    for slug in &module_slugs {
        let module = find_by_slug(&modules, slug)?.clone();
        let children = module["modules"].as_array().cloned().unwrap_or_default();
        if !children.is_empty() {
            modules = children;
            dashboard["modules"] = json!([module]);
        } else if let Some(tabs) = module.get("tabs").and_then(Value::as_array) {
            if last_slug == *slug {
                dashboard["modules"] = json!([module]);
            } else {
                let tab_slug = last_slug.replace(&format!("{}-", slug), "");
                let mut tab = find_by_slug(tabs, &tab_slug)?.clone();
                tab["info"] = module["info"].clone();
                tab["title"] = json!(format!(
                    "{} - {}",
                    module["title"].as_str().unwrap_or_default(),
                    tab["title"].as_str().unwrap_or_default()
                ));
                dashboard["modules"] = json!([tab]);
            }
            break;
        } else {
            dashboard["modules"] = json!([module]);
        }
    }
    dashboard["page-type"] = json!("module");
    Some(dashboard)
}

fn find_by_slug<'a>(items: &'a [Value], slug: &str) -> Option<&'a Value> {
    items.iter().find(|item| item["slug"] == slug)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: Uuid,
    pub dashboard_id: Uuid,
    pub title: String,
    pub url: String,
    pub link_type: String,
}

impl Link {
    pub fn serialize(&self) -> Value {
        json!({ "title": self.title, "type": self.link_type, "url": self.url })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModuleType {
    pub id: Uuid,
    pub name: String,
    pub schema: Value,
}

impl ModuleType {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), name: String::new(), schema: json!({}) }
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO module_types (id, name, schema) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, schema = EXCLUDED.schema",
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.schema)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !MODULE_TYPE_NAME_RE.is_match(&self.name) || self.name.len() > 25 {
            return Err(ValidationError::Model(
                "Module type name can only contain lowercase letters, numbers or underscores".to_string(),
            ));
        }
        validation::check_schema(&self.schema)
    }

    pub fn serialize(&self) -> Value {
        json!({ "id": self.id, "name": self.name, "schema": self.schema })
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<ModuleType>, DatabaseError> {
        let row = sqlx::query_as::<_, ModuleType>("SELECT * FROM module_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub id: Uuid,
    pub type_id: Uuid,
    pub dashboard_id: Uuid,
    pub data_set_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub info: Vec<String>,
    pub options: Value,
    pub query_parameters: Option<Value>,
    pub ordering: i32,
}

/// Options are only checked against the module type schema when any were given
fn options_unset(options: &Value) -> bool {
    options.as_object().map_or(options.is_null(), Map::is_empty)
}

fn check_options(schema: &Value, options: &Value) -> Result<(), ValidationError> {
    if options_unset(options) {
        return Ok(());
    }
    validation::validate_against(schema, options).map_err(|e| ValidationError::Model(format!("options are invalid: {}", e)))
}

impl Module {
    pub fn new(dashboard_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_id: Uuid::nil(),
            dashboard_id,
            data_set_id: None,
            parent_id: None,
            slug: String::new(),
            title: String::new(),
            description: String::new(),
            info: vec![],
            options: json!({}),
            query_parameters: None,
            ordering: 0,
        }
    }

    /// Wrap scalar `group_by` values in lists, then check options against the module type's
    /// schema and query parameters against the shared query schema
    pub async fn validate(&mut self, conn: &mut PgConnection) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::new();
        if !validation::is_slug(&self.slug) {
            errors.add("slug", "Slug can only contain lower case letters, numbers or hyphens");
        }
        for (field, value, max) in [("slug", &self.slug, 60), ("title", &self.title, 60), ("description", &self.description, 200)] {
            if value.chars().count() > max {
                errors.add(field, format!("Ensure this value has at most {} characters.", max));
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError::Model(errors.message()));
        }

        if let Some(query_parameters) = self.query_parameters.as_mut() {
            validation::listify_group_by(query_parameters);
            validation::validate_against(&QUERY_PARAM_SCHEMA, query_parameters)
                .map_err(|e| ValidationError::Model(format!("query parameters are invalid: {}", e)))?;
        }
        if let Some(tabs) = self.options.get_mut("tabs").and_then(Value::as_array_mut) {
            for tab in tabs {
                if let Some(query) = tab.pointer_mut("/data-source/query-params") {
                    validation::listify_group_by(query);
                }
            }
        }

        if options_unset(&self.options) {
            return Ok(());
        }
        let module_type = ModuleType::find(conn, self.type_id)
            .await
            .map_err(|e| ValidationError::Model(e.to_string()))?
            .ok_or_else(|| ValidationError::Model(format!("module type with id {} not found", self.type_id)))?;
        check_options(&module_type.schema, &self.options)
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<Module>, DatabaseError> {
        let row = sqlx::query_as::<_, Module>("SELECT * FROM modules WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Modules of `dashboard_id` directly under `parent` (top level when `None`), in display order
    pub async fn children(conn: &mut PgConnection, dashboard_id: Uuid, parent: Option<Uuid>) -> Result<Vec<Module>, DatabaseError> {
        let rows = sqlx::query_as::<_, Module>(
            "SELECT * FROM modules
             WHERE dashboard_id = $1 AND parent_id IS NOT DISTINCT FROM $2
             ORDER BY ordering",
        )
        .bind(dashboard_id)
        .bind(parent)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn module_type(&self, conn: &mut PgConnection) -> Result<ModuleType, DatabaseError> {
        let row = sqlx::query_as::<_, ModuleType>("SELECT * FROM module_types WHERE id = $1")
            .bind(self.type_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    /// `(data_group, data_type)` of the backing data set
    pub async fn data_source(&self, conn: &mut PgConnection) -> Result<Option<(String, String)>, DatabaseError> {
        let Some(data_set_id) = self.data_set_id else {
            return Ok(None);
        };
        let names: Option<(String, String)> = sqlx::query_as(
            "SELECT g.name, t.name FROM data_sets ds
             JOIN data_groups g ON g.id = ds.data_group_id
             JOIN data_types t ON t.id = ds.data_type_id
             WHERE ds.id = $1",
        )
        .bind(data_set_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(names)
    }

    pub async fn save(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO modules (
                id, type_id, dashboard_id, data_set_id, parent_id, slug, title,
                description, info, options, query_parameters, ordering
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                type_id = EXCLUDED.type_id,
                dashboard_id = EXCLUDED.dashboard_id,
                data_set_id = EXCLUDED.data_set_id,
                parent_id = EXCLUDED.parent_id,
                slug = EXCLUDED.slug,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                info = EXCLUDED.info,
                options = EXCLUDED.options,
                query_parameters = EXCLUDED.query_parameters,
                ordering = EXCLUDED.ordering",
        )
        .bind(self.id)
        .bind(self.type_id)
        .bind(self.dashboard_id)
        .bind(self.data_set_id)
        .bind(self.parent_id)
        .bind(&self.slug)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.info)
        .bind(&self.options)
        .bind(&self.query_parameters)
        .bind(self.ordering)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub fn serialize<'a>(&'a self, conn: &'a mut PgConnection) -> BoxFuture<'a, Result<Value, DatabaseError>> {
        Box::pin(async move {
            let mut out = json!({
                "id": self.id,
                "type": { "id": self.type_id },
                "dashboard": { "id": self.dashboard_id },
                "slug": self.slug,
                "title": self.title,
                "description": self.description,
                "info": self.info,
                "options": self.options,
                "query_parameters": self.query_parameters,
                "order": self.ordering,
            });
            match self.data_source(conn).await? {
                Some((group, data_type)) => {
                    out["data_group"] = json!(group);
                    out["data_type"] = json!(data_type);
                }
                None => out["data_set"] = Value::Null,
            }
            out["parent"] = match self.parent_id {
                Some(id) => json!({ "id": id }),
                None => Value::Null,
            };
            let mut modules = vec![];
            for child in Module::children(conn, self.dashboard_id, Some(self.id)).await? {
                modules.push(child.serialize(conn).await?);
            }
            out["modules"] = Value::Array(modules);
            Ok(out)
        })
    }

    pub fn spotlightify<'a>(&'a self, conn: &'a mut PgConnection) -> BoxFuture<'a, Result<Value, DatabaseError>> {
        Box::pin(async move {
            let mut out = match &self.options {
                Value::Object(map) => Value::Object(map.clone()),
                _ => json!({}),
            };
            out["module-type"] = json!(self.module_type(conn).await?.name);
            out["slug"] = json!(self.slug);
            out["title"] = json!(self.title);
            out["description"] = json!(self.description);
            out["info"] = json!(self.info);
            if let Some((group, data_type)) = self.data_source(conn).await? {
                let mut source = json!({ "data-group": group, "data-type": data_type });
                if let Some(query) = &self.query_parameters {
                    source["query-params"] = query.clone();
                }
                out["data-source"] = source;
            }
            let mut modules = vec![];
            for child in Module::children(conn, self.dashboard_id, Some(self.id)).await? {
                modules.push(child.spotlightify(conn).await?);
            }
            out["modules"] = Value::Array(modules);
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard_json() -> Value {
        json!({
            "slug": "carers-allowance",
            "title": "Carer's Allowance",
            "page-type": "dashboard",
            "modules": [
                { "slug": "volumes", "title": "Volumes", "info": ["a"], "modules": [] },
                {
                    "slug": "by-channel",
                    "title": "By channel",
                    "info": ["b"],
                    "modules": [],
                    "tabs": [{ "slug": "week", "title": "Weekly" }]
                },
                {
                    "slug": "section",
                    "title": "Section",
                    "info": [],
                    "modules": [{ "slug": "nested", "title": "Nested", "info": [], "modules": [] }]
                }
            ]
        })
    }

    #[test]
    fn no_slug_returns_whole_dashboard() {
        let out = modules_or_tabs(None, dashboard_json()).unwrap();
        assert_eq!(out["modules"].as_array().unwrap().len(), 3);
        let out = modules_or_tabs(Some("carers-allowance"), dashboard_json()).unwrap();
        assert_eq!(out["page-type"], "dashboard");
    }

    #[test]
    fn module_slug_narrows_to_module() {
        let out = modules_or_tabs(Some("carers-allowance/volumes"), dashboard_json()).unwrap();
        assert_eq!(out["page-type"], "module");
        assert_eq!(out["modules"][0]["slug"], "volumes");
        assert_eq!(out["modules"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn nested_module_slug_walks_children() {
        let out = modules_or_tabs(Some("carers-allowance/section/nested"), dashboard_json()).unwrap();
        assert_eq!(out["modules"][0]["slug"], "nested");
    }

    #[test]
    fn tab_slug_merges_title_and_info() {
        let out = modules_or_tabs(Some("carers-allowance/by-channel/by-channel-week"), dashboard_json()).unwrap();
        let tab = &out["modules"][0];
        assert_eq!(tab["slug"], "week");
        assert_eq!(tab["title"], "By channel - Weekly");
        assert_eq!(tab["info"], json!(["b"]));
    }

    #[test]
    fn unknown_module_slug_is_none() {
        assert!(modules_or_tabs(Some("carers-allowance/missing"), dashboard_json()).is_none());
        assert!(modules_or_tabs(Some("carers-allowance/by-channel/by-channel-year"), dashboard_json()).is_none());
    }

    #[test]
    fn published_tracks_status() {
        let mut d = Dashboard::new();
        assert!(!d.published());
        d.set_published(true);
        assert_eq!(d.status, "published");
    }

    #[test]
    fn field_errors_report_bad_slug_and_choice() {
        let mut d = Dashboard::new();
        d.slug = "Not A Slug".to_string();
        d.title = "t".to_string();
        d.customer_type = "Aliens".to_string();
        let fields: Vec<&str> = d.field_errors().iter().map(|(f, _)| *f).collect();
        assert_eq!(fields, vec!["slug", "customer_type"]);
    }

    #[test]
    fn module_type_name_and_schema_are_checked() {
        let mut t = ModuleType::new();
        t.name = "kpi".to_string();
        t.schema = json!({ "type": "object" });
        assert!(t.validate().is_ok());

        t.name = "Bad-Name".to_string();
        assert!(t.validate().is_err());

        t.name = "grouped_timeseries".to_string();
        t.schema = json!({ "type": "nonsense" });
        assert!(t.validate().unwrap_err().to_string().starts_with("schema is invalid"));
    }

    #[test]
    fn module_options_only_checked_when_present() {
        let schema = json!({
            "type": "object",
            "properties": { "value-attribute": { "type": "string" } },
            "required": ["value-attribute"]
        });
        assert!(check_options(&schema, &json!({})).is_ok());
        assert!(check_options(&schema, &Value::Null).is_ok());

        let err = check_options(&schema, &json!({ "axis-period": "week" })).unwrap_err();
        assert!(err.to_string().starts_with("options are invalid: "));
        assert!(check_options(&schema, &json!({ "value-attribute": "count:sum" })).is_ok());
    }
}
