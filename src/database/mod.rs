pub mod manager;
pub mod models;
pub mod query_builder;
pub mod repository;

pub use manager::{finish, DatabaseError, DatabaseManager};
pub use repository::Repository;
