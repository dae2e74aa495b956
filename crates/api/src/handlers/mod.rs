//! HTTP handlers, grouped by resource. Thin glue over `db::repository` —
//! no business logic lives here; the REST CRUD surface is an external
//! collaborator that talks to the core only through its persisted contracts.

pub mod runs;
pub mod workflows;

pub use crate::AppState;
