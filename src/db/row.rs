//! Conversions between JSON values and the storage engine: bindable
//! parameters one way, decoded rows the other.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgRow, PgTypeInfo, Postgres};
use sqlx::Database;

/// A parameter value bindable to a PostgreSQL statement, built from
/// `serde_json::Value`.
#[derive(Clone, Debug)]
pub enum BindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl BindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::I64(i)
                } else {
                    BindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => match uuid::Uuid::parse_str(s) {
                Ok(u) => BindValue::Uuid(u),
                Err(_) => BindValue::Str(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => BindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for BindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            BindValue::Null => <Option<i32> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            BindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            BindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            BindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            BindValue::Str(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            BindValue::Uuid(u) => {
                let text = u.to_string();
                <&str as Encode<Postgres>>::encode_by_ref(&text.as_str(), buf)?
            }
            BindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }
}

impl sqlx::Type<Postgres> for BindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

/// Decode a row into a JSON object keyed by column name.
pub fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_strings_bind_as_uuid() {
        let v = Value::String("6dba9a6a-3f0f-4f6a-9e35-0a0c9d9d4a01".into());
        assert!(matches!(BindValue::from_json(&v), BindValue::Uuid(_)));
    }

    #[test]
    fn numbers_prefer_integers() {
        assert!(matches!(
            BindValue::from_json(&Value::from(7)),
            BindValue::I64(7)
        ));
        assert!(matches!(
            BindValue::from_json(&Value::from(1.5)),
            BindValue::F64(_)
        ));
    }

    #[test]
    fn containers_bind_as_json() {
        assert!(matches!(
            BindValue::from_json(&serde_json::json!({"a": 1})),
            BindValue::Json(_)
        ));
    }
}
