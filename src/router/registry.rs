//! Explicit route table: controllers and routes are registered by
//! hand-written code at startup, producing an immutable lookup table of
//! (path, verb) -> handler descriptor. Nothing is discovered at runtime.

use crate::auth::{Access, AnonymousPaths, Mode};
use crate::case::to_path_segment;
use crate::error::AppError;
use crate::router::bind::CallArgs;
use axum::http::Method;
use axum::response::Response;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Verb {
    pub fn from_method(method: &Method) -> Option<Verb> {
        match *method {
            Method::GET => Some(Verb::Get),
            Method::POST => Some(Verb::Post),
            Method::PUT => Some(Verb::Put),
            Method::DELETE => Some(Verb::Delete),
            Method::PATCH => Some(Verb::Patch),
            _ => None,
        }
    }

    pub(crate) fn filter(self) -> axum::routing::MethodFilter {
        use axum::routing::MethodFilter;
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Delete => MethodFilter::DELETE,
            Verb::Patch => MethodFilter::PATCH,
        }
    }
}

/// Semantic kind of one handler parameter.
#[derive(Clone, Copy, Debug)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    /// Case-insensitive match against the declared variant names; the bound
    /// value is the canonical name.
    Enum(&'static [&'static str]),
    /// Repeated query parameters only.
    StrList,
    /// The whole request body parsed as JSON.
    Body,
    /// Framework-injected request context.
    Context,
    /// Framework-injected caller identity.
    User,
}

#[derive(Clone, Debug)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

/// What a handler hands back to the dispatcher.
pub enum Reply {
    /// Serialized to the response body as `application/json`.
    Json(Value),
    /// Passed through untouched; pair with `self_managed` routes.
    Raw(Response),
}

impl Reply {
    pub fn json<T: Serialize>(value: T) -> Result<Reply, AppError> {
        Ok(Reply::Json(serde_json::to_value(value)?))
    }

    pub fn raw(response: Response) -> Reply {
        Reply::Raw(response)
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, AppError>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(CallArgs) -> HandlerFuture + Send + Sync>;

/// Static record describing one route: target names, verb, path, parameter
/// shapes, access requirement, and the invocation target. Built once at
/// registration, immutable afterwards.
pub struct HandlerDescriptor {
    pub controller: String,
    pub action: String,
    pub verb: Verb,
    pub path: String,
    pub params: Vec<ParameterSpec>,
    pub access: Access,
    pub self_managed: bool,
    pub(crate) handler: HandlerFn,
}

/// One route under construction. Verb defaults to POST.
pub struct RouteDef {
    action: String,
    verb: Verb,
    params: Vec<ParameterSpec>,
    access: Access,
    self_managed: bool,
    anonymous: bool,
    handler: Option<HandlerFn>,
}

impl RouteDef {
    pub fn new(action: &str) -> Self {
        RouteDef {
            action: action.to_string(),
            verb: Verb::Post,
            params: Vec::new(),
            access: Access::Public,
            self_managed: false,
            anonymous: false,
            handler: None,
        }
    }

    pub fn verb(mut self, verb: Verb) -> Self {
        self.verb = verb;
        self
    }

    pub fn param(mut self, name: &str, kind: ParamKind) -> Self {
        self.params.push(ParameterSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    pub fn opt_param(mut self, name: &str, kind: ParamKind) -> Self {
        self.params.push(ParameterSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    pub fn require_role<I, S>(mut self, roles: I, mode: Mode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access = Access::require_role(roles, mode);
        self
    }

    pub fn require_permission<I, J, S, T>(mut self, permissions: I, mode: Mode, or_roles: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.access = Access::require_permission(permissions, mode, or_roles);
        self
    }

    pub fn allow_anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// The route writes its own response; the dispatcher skips
    /// serialization.
    pub fn self_managed(mut self) -> Self {
        self.self_managed = true;
        self
    }

    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, AppError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args| Box::pin(f(args))));
        self
    }
}

/// The route table and its anonymous-path exclusions, built once at startup.
pub struct RouteRegistry {
    mount_prefix: String,
    table: HashMap<(String, Verb), Arc<HandlerDescriptor>>,
    anonymous: AnonymousPaths,
}

impl RouteRegistry {
    /// `mount_prefix` is stripped from inbound paths before lookup
    /// (e.g. "/api").
    pub fn new(mount_prefix: &str) -> Self {
        RouteRegistry {
            mount_prefix: mount_prefix.trim_end_matches('/').to_string(),
            table: HashMap::new(),
            anonymous: AnonymousPaths::default(),
        }
    }

    /// Open a registration scope for one controller. The base path comes
    /// from the name with a `Controller` suffix stripped, in path casing:
    /// "DemoController" -> "/demo".
    pub fn controller(&mut self, name: &str) -> ControllerScope<'_> {
        let stripped = name.strip_suffix("Controller").unwrap_or(name);
        let base = format!("/{}", to_path_segment(stripped));
        ControllerScope {
            registry: self,
            controller: name.to_string(),
            base,
        }
    }

    /// Like [`RouteRegistry::controller`] with an explicit path prefix
    /// instead of the name-derived one.
    pub fn controller_at(&mut self, name: &str, prefix: &str) -> ControllerScope<'_> {
        let base = format!("/{}", to_path_segment(prefix.trim_matches('/')));
        ControllerScope {
            registry: self,
            controller: name.to_string(),
            base,
        }
    }

    pub fn mount_prefix(&self) -> &str {
        &self.mount_prefix
    }

    pub fn lookup(&self, path: &str, verb: Verb) -> Option<Arc<HandlerDescriptor>> {
        self.table.get(&(path.to_string(), verb)).cloned()
    }

    pub fn anonymous_paths(&self) -> &AnonymousPaths {
        &self.anonymous
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<HandlerDescriptor>> {
        self.table.values()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        HashMap<(String, Verb), Arc<HandlerDescriptor>>,
        AnonymousPaths,
    ) {
        (self.mount_prefix, self.table, self.anonymous)
    }

    fn insert(&mut self, descriptor: HandlerDescriptor) {
        let key = (descriptor.path.clone(), descriptor.verb);
        if let Some(old) = self.table.insert(key, Arc::new(descriptor)) {
            tracing::warn!(
                path = %old.path,
                verb = ?old.verb,
                "duplicate route registration replaced"
            );
        }
    }
}

pub struct ControllerScope<'a> {
    registry: &'a mut RouteRegistry,
    controller: String,
    base: String,
}

impl ControllerScope<'_> {
    /// Exclude every route under this controller from authentication.
    pub fn allow_anonymous(self) -> Self {
        let pattern = format!("{}/**", self.base).replace("//", "/");
        self.registry.anonymous.add(&pattern);
        self
    }

    /// Register one route at `<base>/<actionInPathCasing>`.
    ///
    /// Panics if the definition has no handler; registration runs at
    /// startup, so this fails fast on a wiring mistake.
    pub fn route(self, def: RouteDef) -> Self {
        let path = format!("{}/{}", self.base, to_path_segment(&def.action)).replace("//", "/");
        let handler = def
            .handler
            .unwrap_or_else(|| panic!("route {path} registered without a handler"));
        if def.anonymous {
            self.registry.anonymous.add(&path);
        }
        self.registry.insert(HandlerDescriptor {
            controller: self.controller.clone(),
            action: def.action,
            verb: def.verb,
            path,
            params: def.params,
            access: def.access,
            self_managed: def.self_managed,
            handler,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl Fn(CallArgs) -> std::future::Ready<Result<Reply, AppError>> + Send + Sync {
        |_args| std::future::ready(Ok(Reply::Json(Value::Null)))
    }

    #[test]
    fn controller_suffix_is_stripped_and_path_cased() {
        let mut registry = RouteRegistry::new("/api");
        registry
            .controller("UserAccountController")
            .route(RouteDef::new("getProfile").verb(Verb::Get).handler(noop()));
        let found = registry.lookup("/userAccount/getProfile", Verb::Get);
        assert!(found.is_some());
        assert_eq!(found.unwrap().controller, "UserAccountController");
    }

    #[test]
    fn verb_defaults_to_post() {
        let mut registry = RouteRegistry::new("");
        registry
            .controller("Demo")
            .route(RouteDef::new("save").handler(noop()));
        assert!(registry.lookup("/demo/save", Verb::Post).is_some());
        assert!(registry.lookup("/demo/save", Verb::Get).is_none());
    }

    #[test]
    fn anonymous_route_and_controller_scopes() {
        let mut registry = RouteRegistry::new("");
        registry
            .controller("Auth")
            .allow_anonymous()
            .route(RouteDef::new("login").handler(noop()));
        registry
            .controller("Demo")
            .route(RouteDef::new("ping").allow_anonymous().handler(noop()))
            .route(RouteDef::new("secret").handler(noop()));
        let anon = registry.anonymous_paths();
        assert!(anon.matches("/auth/login"));
        assert!(anon.matches("/auth/anything/else"));
        assert!(anon.matches("/demo/ping"));
        assert!(!anon.matches("/demo/secret"));
    }

    #[test]
    fn explicit_prefix_overrides_name() {
        let mut registry = RouteRegistry::new("");
        registry
            .controller_at("LegacyController", "v2/legacy_api")
            .route(RouteDef::new("run").handler(noop()));
        assert!(registry.lookup("/v2/legacyApi/run", Verb::Post).is_some());
    }
}
