//! Route registration and central dispatch.

pub mod bind;
pub mod dispatch;
pub mod registry;

pub use bind::{BoundValue, CallArgs, RequestMeta};
pub use dispatch::into_router;
pub use registry::{
    HandlerDescriptor, HandlerFn, HandlerFuture, ParamKind, ParameterSpec, Reply, RouteDef,
    RouteRegistry, Verb,
};
