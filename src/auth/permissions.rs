use crate::auth::AuthUser;
use crate::types::{ResourceKind, Verb};

const SIGNIN: &[&str] = &["signin"];
const ADMIN: &[&str] = &["admin"];
const USER: &[&str] = &["user"];
const ORGANISATION: &[&str] = &["organisation"];
const TRANSFORMS: &[&str] = &["transforms"];
const DASHBOARD: &[&str] = &["dashboard"];
const COLLECTOR_VIEW: &[&str] = &["collector-view", "collector", "admin"];
const COLLECTOR_EDIT: &[&str] = &["collector", "admin"];
const USER_UPDATE: &[&str] = &["user_update_permission"];
const NOBODY: &[&str] = &[];

/// Roles allowed to perform `verb` on `kind`.
///
/// An empty role list never matches, so verbs missing from the table are refused.
/// `None` means anonymous access is allowed and no token is required.
pub fn roles_for(kind: ResourceKind, verb: Verb) -> Option<&'static [&'static str]> {
    use ResourceKind::*;
    use Verb::*;

    match (kind, verb) {
        (DataGroup | DataType, Get | Post | Put) => Some(SIGNIN),
        (DataSet, Get) => Some(SIGNIN),
        (DataSet, Post | Put | Delete) => Some(ADMIN),
        (DataSetUsers, Get) => Some(ADMIN),

        (User, Get | Post | Put) => Some(USER),
        (SignonUser, Post) => Some(USER_UPDATE),

        (NodeType | Node, Get) => None,
        (NodeType | Node, Post | Put) => Some(ORGANISATION),

        (TransformType | Transform, Get) => None,
        (TransformType | Transform, Post | Put) => Some(TRANSFORMS),

        (ModuleType, Get) => None,
        (ModuleType, Post | Put) => Some(DASHBOARD),
        (Dashboard | Module, Get | Post | Put) => Some(DASHBOARD),

        (Provider | CollectorType, Get) => Some(COLLECTOR_VIEW),
        (Provider | CollectorType, Post | Put) => Some(ADMIN),
        (DataSource | Collector, Get) => Some(COLLECTOR_VIEW),
        (DataSource | Collector, Post | Put) => Some(COLLECTOR_EDIT),

        _ => Some(NOBODY),
    }
}

/// True when no role is required or the user holds at least one of `roles`
pub fn check_permission(user: &AuthUser, roles: Option<&[&str]>) -> bool {
    match roles {
        None => true,
        Some(roles) => roles.iter().any(|role| user.has_permission(role)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(permissions: &[&str]) -> AuthUser {
        AuthUser {
            uid: "uid".to_string(),
            email: "someone@example.gov.uk".to_string(),
            name: None,
            organisation_slug: None,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn anonymous_resources_need_no_role() {
        assert_eq!(roles_for(ResourceKind::Node, Verb::Get), None);
        assert_eq!(roles_for(ResourceKind::TransformType, Verb::Get), None);
        assert!(check_permission(&AuthUser::anonymous(), roles_for(ResourceKind::Node, Verb::Get)));
    }

    #[test]
    fn any_matching_role_is_enough() {
        let viewer = user_with(&["collector-view"]);
        assert!(check_permission(&viewer, roles_for(ResourceKind::Collector, Verb::Get)));
        assert!(!check_permission(&viewer, roles_for(ResourceKind::Collector, Verb::Post)));

        let admin = user_with(&["admin"]);
        assert!(check_permission(&admin, roles_for(ResourceKind::Collector, Verb::Post)));
        assert!(check_permission(&admin, roles_for(ResourceKind::Provider, Verb::Put)));
    }

    #[test]
    fn signin_users_cannot_write_data_sets() {
        let user = user_with(&["signin"]);
        assert!(check_permission(&user, roles_for(ResourceKind::DataSet, Verb::Get)));
        assert!(!check_permission(&user, roles_for(ResourceKind::DataSet, Verb::Post)));
        assert!(!check_permission(&user, roles_for(ResourceKind::DataSetUsers, Verb::Get)));
    }

    #[test]
    fn unlisted_verbs_are_refused() {
        let admin = user_with(&["admin", "organisation"]);
        assert_eq!(roles_for(ResourceKind::Node, Verb::Delete), Some(&[][..]));
        assert!(!check_permission(&admin, roles_for(ResourceKind::Node, Verb::Delete)));
    }
}
