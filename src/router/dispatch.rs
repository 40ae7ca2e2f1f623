//! Central dispatch: every registered route runs through a single pipeline
//! of path normalization, table lookup, authentication, access check,
//! argument binding, invocation, and reply serialization. Failures at any
//! stage become the structured error body.

use crate::auth::{token_of, AnonymousPaths, Authenticator, AuthUser};
use crate::error::AppError;
use crate::router::bind::{bind_parameters, RequestMeta};
use crate::router::registry::{HandlerDescriptor, Reply, RouteRegistry, Verb};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

struct DispatchInner {
    mount_prefix: String,
    table: HashMap<(String, Verb), Arc<HandlerDescriptor>>,
    anonymous: AnonymousPaths,
    authenticator: Arc<dyn Authenticator>,
}

#[derive(Clone)]
struct DispatchState(Arc<DispatchInner>);

/// Turn a finished registry into an axum router. Each registered path gets
/// a method router whose every verb funnels into the shared dispatch
/// pipeline.
pub fn into_router(registry: RouteRegistry, authenticator: Arc<dyn Authenticator>) -> Router {
    let (mount_prefix, table, anonymous) = registry.into_parts();

    let mut verbs_by_path: HashMap<String, Vec<Verb>> = HashMap::new();
    for (path, verb) in table.keys() {
        verbs_by_path.entry(path.clone()).or_default().push(*verb);
    }

    let state = DispatchState(Arc::new(DispatchInner {
        mount_prefix: mount_prefix.clone(),
        table,
        anonymous,
        authenticator,
    }));

    let mut router = Router::new();
    for (path, verbs) in verbs_by_path {
        let full = format!("{mount_prefix}{path}");
        let mut method_router: MethodRouter<DispatchState> = MethodRouter::new();
        for verb in verbs {
            method_router = method_router.on(verb.filter(), dispatch);
        }
        router = router.route(&full, method_router);
    }
    router.with_state(state)
}

async fn dispatch(State(state): State<DispatchState>, request: Request) -> Response {
    match run(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn run(state: DispatchState, request: Request) -> Result<Response, AppError> {
    let inner = &state.0;
    let path = normalize_path(request.uri().path(), &inner.mount_prefix);
    let verb = Verb::from_method(request.method())
        .ok_or_else(|| AppError::NotFound(path.clone()))?;
    let descriptor = inner
        .table
        .get(&(path.clone(), verb))
        .cloned()
        .ok_or_else(|| AppError::NotFound(path.clone()))?;

    let mut user: Option<AuthUser> = None;
    if !inner.anonymous.matches(&path) {
        let token = token_of(request.headers())
            .ok_or_else(|| AppError::Unauthenticated("missing or malformed token".into()))?;
        let resolved = inner.authenticator.authenticate(token).await?;
        user = Some(
            resolved.ok_or_else(|| AppError::Unauthenticated("token not recognized".into()))?,
        );
    }
    if let Some(u) = &user {
        if !descriptor.access.permits(u) {
            return Err(AppError::Forbidden("access requirement not met".into()));
        }
    }

    let (parts, body) = request.into_parts();
    let query: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|q| serde_urlencoded::from_str(q).unwrap_or_default())
        .unwrap_or_default();
    let body_bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|e| AppError::Internal(format!("reading request body: {e}")))?;
    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    let (form, body_slice): (Vec<(String, String)>, &[u8]) = if is_form {
        (
            serde_urlencoded::from_bytes(&body_bytes).unwrap_or_default(),
            &[],
        )
    } else {
        (Vec::new(), &body_bytes[..])
    };

    let meta = Arc::new(RequestMeta {
        method: parts.method.clone(),
        path: path.clone(),
        headers: parts.headers.clone(),
        query: query.clone(),
    });

    tracing::debug!(
        path = %path,
        verb = ?verb,
        controller = %descriptor.controller,
        action = %descriptor.action,
        "dispatch"
    );

    let args = bind_parameters(
        &descriptor.params,
        &query,
        &form,
        body_slice,
        user.as_ref(),
        &meta,
    )?;
    let reply = (descriptor.handler)(args).await?;

    Ok(match reply {
        Reply::Raw(response) => response,
        Reply::Json(_) if descriptor.self_managed => StatusCode::OK.into_response(),
        Reply::Json(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            value.to_string(),
        )
            .into_response(),
    })
}

/// Strip the mount prefix and collapse doubled slashes so lookups see the
/// same canonical paths the registry stored.
fn normalize_path(raw: &str, mount_prefix: &str) -> String {
    let stripped = if !mount_prefix.is_empty() {
        raw.strip_prefix(mount_prefix).unwrap_or(raw)
    } else {
        raw
    };
    let mut path = stripped.replace("//", "/");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}
