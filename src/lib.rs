//! Gantry: request dispatch and transactional persistence library.
//!
//! Routes are registered explicitly into a [`RouteRegistry`] and served
//! through one central dispatch pipeline; storage access flows through a
//! [`DbContext`] whose call-chain transaction frames give nested
//! transactions independent rollback.

pub mod auth;
pub mod case;
pub mod config;
pub mod db;
pub mod error;
pub mod router;

pub use auth::{Access, Authenticator, AuthUser, Mode};
pub use config::{DbConfig, ServerConfig};
pub use db::{descriptor, BindValue, DbContext, Entity, FieldDef, QueryBuilder, Repository};
pub use error::{AppError, ErrorBody};
pub use router::{
    into_router, CallArgs, ParamKind, Reply, RequestMeta, RouteDef, RouteRegistry, Verb,
};
