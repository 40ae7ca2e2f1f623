//! Request-to-argument binding.
//!
//! Scalar parameters resolve by source precedence: JSON body field, then
//! form field, then query parameter. Coercion is lenient where a value is
//! present but malformed (the slot binds null, which only errors if the
//! parameter is required) and strict about absence of required values.

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::router::registry::{ParamKind, ParameterSpec};
use axum::http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Immutable view of the inbound request handed to `Context` parameters.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
}

/// One bound argument slot.
#[derive(Clone, Debug)]
pub enum BoundValue {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StrList(Vec<String>),
    Json(Value),
    User(AuthUser),
    Context(Arc<RequestMeta>),
}

/// Positional arguments for one handler invocation, in declaration order.
#[derive(Debug)]
pub struct CallArgs {
    values: Vec<BoundValue>,
}

impl CallArgs {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&BoundValue, AppError> {
        self.values
            .get(index)
            .ok_or_else(|| AppError::Internal(format!("argument index {index} out of range")))
    }

    pub fn str(&self, index: usize) -> Result<&str, AppError> {
        match self.slot(index)? {
            BoundValue::Str(s) => Ok(s),
            other => Err(type_mismatch(index, "string", other)),
        }
    }

    pub fn opt_str(&self, index: usize) -> Result<Option<&str>, AppError> {
        match self.slot(index)? {
            BoundValue::Null => Ok(None),
            BoundValue::Str(s) => Ok(Some(s)),
            other => Err(type_mismatch(index, "string", other)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, AppError> {
        match self.slot(index)? {
            BoundValue::Int(v) => Ok(*v),
            other => Err(type_mismatch(index, "integer", other)),
        }
    }

    pub fn opt_int(&self, index: usize) -> Result<Option<i64>, AppError> {
        match self.slot(index)? {
            BoundValue::Null => Ok(None),
            BoundValue::Int(v) => Ok(Some(*v)),
            other => Err(type_mismatch(index, "integer", other)),
        }
    }

    pub fn float(&self, index: usize) -> Result<f64, AppError> {
        match self.slot(index)? {
            BoundValue::Float(v) => Ok(*v),
            BoundValue::Int(v) => Ok(*v as f64),
            other => Err(type_mismatch(index, "float", other)),
        }
    }

    pub fn opt_float(&self, index: usize) -> Result<Option<f64>, AppError> {
        match self.slot(index)? {
            BoundValue::Null => Ok(None),
            BoundValue::Float(v) => Ok(Some(*v)),
            BoundValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(type_mismatch(index, "float", other)),
        }
    }

    pub fn boolean(&self, index: usize) -> Result<bool, AppError> {
        match self.slot(index)? {
            BoundValue::Bool(v) => Ok(*v),
            BoundValue::Null => Ok(false),
            other => Err(type_mismatch(index, "bool", other)),
        }
    }

    pub fn list(&self, index: usize) -> Result<&[String], AppError> {
        match self.slot(index)? {
            BoundValue::StrList(items) => Ok(items),
            BoundValue::Null => Ok(&[]),
            other => Err(type_mismatch(index, "string list", other)),
        }
    }

    /// Decode a `Body` slot into a concrete type.
    pub fn json<T: DeserializeOwned>(&self, index: usize) -> Result<T, AppError> {
        match self.slot(index)? {
            BoundValue::Json(value) => Ok(serde_json::from_value(value.clone())?),
            other => Err(type_mismatch(index, "json body", other)),
        }
    }

    pub fn opt_json<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, AppError> {
        match self.slot(index)? {
            BoundValue::Null => Ok(None),
            BoundValue::Json(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            other => Err(type_mismatch(index, "json body", other)),
        }
    }

    pub fn user(&self, index: usize) -> Result<&AuthUser, AppError> {
        match self.slot(index)? {
            BoundValue::User(u) => Ok(u),
            other => Err(type_mismatch(index, "user", other)),
        }
    }

    pub fn opt_user(&self, index: usize) -> Result<Option<&AuthUser>, AppError> {
        match self.slot(index)? {
            BoundValue::Null => Ok(None),
            BoundValue::User(u) => Ok(Some(u)),
            other => Err(type_mismatch(index, "user", other)),
        }
    }

    pub fn context(&self, index: usize) -> Result<&RequestMeta, AppError> {
        match self.slot(index)? {
            BoundValue::Context(meta) => Ok(meta),
            other => Err(type_mismatch(index, "request context", other)),
        }
    }
}

fn type_mismatch(index: usize, wanted: &str, got: &BoundValue) -> AppError {
    AppError::Internal(format!(
        "argument {index}: expected {wanted}, bound {got:?}"
    ))
}

/// Bind every declared parameter from the request, in declaration order.
pub fn bind_parameters(
    specs: &[ParameterSpec],
    query: &[(String, String)],
    form: &[(String, String)],
    body: &[u8],
    user: Option<&AuthUser>,
    meta: &Arc<RequestMeta>,
) -> Result<CallArgs, AppError> {
    let body_json: Option<Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(body).ok()
    };
    let body_map = body_json.as_ref().and_then(Value::as_object);

    let mut values = Vec::with_capacity(specs.len());
    for spec in specs {
        let bound = match spec.kind {
            ParamKind::Context => BoundValue::Context(Arc::clone(meta)),
            ParamKind::User => match user {
                Some(u) => BoundValue::User(u.clone()),
                None if spec.required => {
                    return Err(AppError::RequiredArgument(spec.name.clone()))
                }
                None => BoundValue::Null,
            },
            ParamKind::Body => match &body_json {
                Some(value) => BoundValue::Json(value.clone()),
                None if !body.is_empty() && spec.required => {
                    return Err(AppError::InvalidArgument(spec.name.clone()))
                }
                None if spec.required => {
                    return Err(AppError::RequiredArgument(spec.name.clone()))
                }
                None => BoundValue::Null,
            },
            ParamKind::StrList => {
                let items: Vec<String> = query
                    .iter()
                    .filter(|(k, _)| k == &spec.name)
                    .map(|(_, v)| v.clone())
                    .collect();
                if items.is_empty() {
                    if spec.required {
                        return Err(AppError::RequiredArgument(spec.name.clone()));
                    }
                    BoundValue::Null
                } else {
                    BoundValue::StrList(items)
                }
            }
            ParamKind::Str
            | ParamKind::Int
            | ParamKind::Float
            | ParamKind::Bool
            | ParamKind::Enum(_) => {
                let raw = scalar_source(&spec.name, body_map, form, query);
                let bound = match raw {
                    Some(text) => coerce_scalar(&text, spec.kind),
                    None => BoundValue::Null,
                };
                if spec.required && matches!(bound, BoundValue::Null) {
                    return Err(AppError::RequiredArgument(spec.name.clone()));
                }
                bound
            }
        };
        values.push(bound);
    }
    Ok(CallArgs { values })
}

/// Resolve a scalar's textual value: body field first, then form, then
/// query. A JSON null in the body does not shadow form or query values.
fn scalar_source(
    name: &str,
    body: Option<&serde_json::Map<String, Value>>,
    form: &[(String, String)],
    query: &[(String, String)],
) -> Option<String> {
    if let Some(value) = body.and_then(|m| m.get(name)) {
        if !value.is_null() {
            return Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }
    form.iter()
        .find(|(k, _)| k == name)
        .or_else(|| query.iter().find(|(k, _)| k == name))
        .map(|(_, v)| v.clone())
}

fn coerce_scalar(raw: &str, kind: ParamKind) -> BoundValue {
    match kind {
        ParamKind::Str => BoundValue::Str(raw.to_string()),
        ParamKind::Int => raw
            .parse::<i64>()
            .map(BoundValue::Int)
            .unwrap_or(BoundValue::Null),
        ParamKind::Float => raw
            .parse::<f64>()
            .map(BoundValue::Float)
            .unwrap_or(BoundValue::Null),
        ParamKind::Bool => BoundValue::Bool(raw.eq_ignore_ascii_case("true")),
        ParamKind::Enum(variants) => variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw))
            .map(|v| BoundValue::Str(v.to_string()))
            .unwrap_or(BoundValue::Null),
        _ => BoundValue::Null,
    }
}
