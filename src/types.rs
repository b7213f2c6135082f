/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// HTTP verbs that carry a permission requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }

    /// Verbs whose request body is written to the audit log
    pub fn has_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put)
    }
}

/// Every resource exposed over HTTP, used as the key of the role table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    DataGroup,
    DataType,
    DataSet,
    DataSetUsers,
    User,
    SignonUser,
    NodeType,
    Node,
    TransformType,
    Transform,
    ModuleType,
    Dashboard,
    Module,
    Provider,
    DataSource,
    CollectorType,
    Collector,
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::DataGroup => "DataGroup",
            ResourceKind::DataType => "DataType",
            ResourceKind::DataSet => "DataSet",
            ResourceKind::DataSetUsers => "DataSetUsers",
            ResourceKind::User => "User",
            ResourceKind::SignonUser => "SignonUser",
            ResourceKind::NodeType => "NodeType",
            ResourceKind::Node => "Node",
            ResourceKind::TransformType => "TransformType",
            ResourceKind::Transform => "Transform",
            ResourceKind::ModuleType => "ModuleType",
            ResourceKind::Dashboard => "Dashboard",
            ResourceKind::Module => "Module",
            ResourceKind::Provider => "Provider",
            ResourceKind::DataSource => "DataSource",
            ResourceKind::CollectorType => "CollectorType",
            ResourceKind::Collector => "Collector",
        }
    }
}
