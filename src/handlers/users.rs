use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::models::User;
use crate::error::ApiError;
use crate::filter::ListFilter;
use crate::handlers::resource::{self, IdField, Resource};
use crate::services::purge;
use crate::types::ResourceKind;

static USER_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "email": { "type": "string" },
            "data_sets": { "type": "object" }
        },
        "required": ["email"],
        "additionalProperties": false
    })
});

#[async_trait]
impl Resource for User {
    const KIND: ResourceKind = ResourceKind::User;
    const TABLE: &'static str = "users";
    const ID_FIELDS: &'static [IdField] = &[IdField::Email("email")];
    const LIST_FILTERS: &'static [ListFilter] = &[ListFilter::iexact("email", "email")];

    fn schema() -> &'static Value {
        &USER_SCHEMA
    }

    fn create() -> Self {
        User::new()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn update(&mut self, _conn: &mut PgConnection, body: &Value, _created: bool) -> Result<(), ApiError> {
        self.email = resource::str_field(body, "email")?.to_string();
        Ok(())
    }

    async fn validate(&mut self, _conn: &mut PgConnection, _user: &AuthUser) -> Result<(), ApiError> {
        if !IdField::Email("email").matches(&self.email) {
            return Err(ApiError::bad_request("email: Enter a valid email address."));
        }
        Ok(())
    }

    async fn save(&mut self, conn: &mut PgConnection) -> Result<(), ApiError> {
        Ok(User::save(self, conn).await?)
    }

    async fn after_save(&self, _conn: &mut PgConnection, _user: &AuthUser, _created: bool) -> Result<(), ApiError> {
        purge::purge_or_log(&purge::user_paths(&self.email)).await;
        Ok(())
    }

    async fn serialize(&self, conn: &mut PgConnection) -> Result<Value, ApiError> {
        Ok(User::serialize(self, conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_request;

    #[test]
    fn user_body_needs_an_email() {
        assert!(validate_request(User::schema(), &json!({ "email": "a@b.gov.uk" })).is_ok());
        assert!(validate_request(User::schema(), &json!({ "data_sets": {} })).is_err());
        assert!(validate_request(User::schema(), &json!({ "email": "a@b.gov.uk", "name": "x" })).is_err());
    }
}
