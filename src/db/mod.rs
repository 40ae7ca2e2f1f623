//! Storage layer: entity metadata, the call-chain transaction context, query
//! building, and the generic repository.

pub mod meta;
pub mod query;
pub mod repository;
pub mod row;
pub mod tx;

pub use meta::{descriptor, Entity, EntityDescriptor, FieldDef};
pub use query::{QueryBuilder, QueryCondition};
pub use repository::Repository;
pub use row::BindValue;
pub use tx::DbContext;
