//! HTTP handlers, one module per area. Most resources go through the
//! generic handlers in [`resource`]; the rest have bespoke endpoints.

pub mod collectors;
pub mod dashboards;
pub mod datasets;
pub mod organisation;
pub mod resource;
pub mod signon;
pub mod status;
pub mod transforms;
pub mod users;
