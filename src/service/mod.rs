//! CrudEngine: generic CRUD over the entity registry and storage adapter.

mod crud;
mod password;
pub use crud::{allowed_columns, finish, CrudEngine};
pub use password::{hash_password, verify_password};
