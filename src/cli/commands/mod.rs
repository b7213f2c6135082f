pub mod data_sets;
pub mod database;
pub mod users;
