pub mod backdrop;
pub mod purge;
