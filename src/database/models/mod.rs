pub mod collectors;
pub mod dashboards;
pub mod datasets;
pub mod organisation;
pub mod transforms;
pub mod user;

pub use collectors::{Collector, CollectorType, DataSource, Provider};
pub use dashboards::{Dashboard, Link, Module, ModuleType};
pub use datasets::{DataGroup, DataSet, DataType};
pub use organisation::{Node, NodeType, TypedNode};
pub use transforms::{Transform, TransformType};
pub use user::{OAuthUser, User};
