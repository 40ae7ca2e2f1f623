//! Generic CRUD façade over one entity type.
//!
//! The fixed statements (create/update/delete/get) use bound parameters and
//! are cached per entity type; because create/update only ever touch the
//! entity's non-null fields, their cache keys include the column subset.
//! Everything routes through the `DbContext`, so a call made inside an
//! active transaction frame runs on that frame's connection.

use crate::db::meta::{cached_statement, descriptor, Entity, EntityDescriptor};
use crate::db::query::QueryBuilder;
use crate::db::row::BindValue;
use crate::db::tx::DbContext;
use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

const BATCH_CHUNK: usize = 1000;

pub struct Repository<E: Entity> {
    db: DbContext,
    meta: Arc<EntityDescriptor>,
    _marker: PhantomData<E>,
}

impl<E: Entity> Repository<E> {
    pub fn new(db: &DbContext) -> Self {
        Repository {
            db: db.clone(),
            meta: descriptor::<E>(),
            _marker: PhantomData,
        }
    }

    /// Insert one row from the entity's non-null fields, excluding the
    /// identifier column. Returns the affected row count.
    pub async fn create(&self, entity: &E) -> Result<u64, AppError> {
        let map = entity_map(entity)?;
        let pairs = non_null_pairs(&self.meta, &map, true);
        if pairs.is_empty() {
            return Err(AppError::InvalidArgument(
                "entity has no non-null fields to insert".into(),
            ));
        }
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        let key = format!("create:{}", columns.join(","));
        let sql = cached_statement::<E>(&key, || insert_statement(&self.meta.table, &columns));
        let binds: Vec<BindValue> = pairs.iter().map(|(_, v)| BindValue::from_json(v)).collect();
        self.db.execute(&sql, &binds).await
    }

    /// Update the row matching the entity's identifier, setting only the
    /// non-null fields. Null fields never clear stored values.
    pub async fn update(&self, entity: &E) -> Result<u64, AppError> {
        let map = entity_map(entity)?;
        let id_field = self.meta.id_field()?.to_string();
        let id_column = self.meta.id_column()?.to_string();
        let id_value = map
            .get(&id_field)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| AppError::RequiredArgument(id_field.clone()))?;
        let pairs = non_null_pairs(&self.meta, &map, true);
        if pairs.is_empty() {
            return Ok(0);
        }
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        let key = format!("update:{}", columns.join(","));
        let sql =
            cached_statement::<E>(&key, || update_statement(&self.meta.table, &columns, &id_column));
        let mut binds: Vec<BindValue> =
            pairs.iter().map(|(_, v)| BindValue::from_json(v)).collect();
        binds.push(BindValue::from_json(&id_value));
        self.db.execute(&sql, &binds).await
    }

    /// Update the row with `id`, setting exactly the given fields (explicit
    /// nulls included). Fields the entity does not declare are skipped.
    pub async fn update_fields(
        &self,
        id: impl Into<Value>,
        fields: &[(String, Value)],
    ) -> Result<u64, AppError> {
        let id_field = self.meta.id_field()?.to_string();
        let id_column = self.meta.id_column()?.to_string();
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            if *field == id_field {
                continue;
            }
            if let Some(column) = self.meta.column_for(field) {
                pairs.push((column.to_string(), value.clone()));
            }
        }
        if pairs.is_empty() {
            return Ok(0);
        }
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        let key = format!("update:{}", columns.join(","));
        let sql =
            cached_statement::<E>(&key, || update_statement(&self.meta.table, &columns, &id_column));
        let mut binds: Vec<BindValue> =
            pairs.iter().map(|(_, v)| BindValue::from_json(v)).collect();
        binds.push(BindValue::from_json(&id.into()));
        self.db.execute(&sql, &binds).await
    }

    pub async fn delete(&self, id: impl Into<Value>) -> Result<u64, AppError> {
        let id_column = self.meta.id_column()?.to_string();
        let sql = cached_statement::<E>("delete", || {
            format!("DELETE FROM {} WHERE {} = $1", self.meta.table, id_column)
        });
        self.db.execute(&sql, &[BindValue::from_json(&id.into())]).await
    }

    pub async fn get(&self, id: impl Into<Value>) -> Result<Option<E>, AppError> {
        let id_column = self.meta.id_column()?.to_string();
        let sql = cached_statement::<E>("get", || {
            let columns: Vec<&str> = self.meta.columns.iter().map(|c| c.column.as_str()).collect();
            format!(
                "SELECT {} FROM {} WHERE {} = $1",
                columns.join(", "),
                self.meta.table,
                id_column
            )
        });
        let row = self
            .db
            .fetch_optional(&sql, &[BindValue::from_json(&id.into())])
            .await?;
        row.map(|r| serde_json::from_value(self.meta.row_to_entity_value(r)).map_err(AppError::from))
            .transpose()
    }

    /// Multi-row insert over all declared fields with inline literals,
    /// chunked at 1000 rows per statement. An empty list issues no SQL.
    pub async fn create_batch(&self, list: &[E]) -> Result<u64, AppError> {
        if list.is_empty() {
            return Ok(0);
        }
        let mut affected = 0u64;
        for chunk in list.chunks(BATCH_CHUNK) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entity in chunk {
                rows.push(entity_map(entity)?);
            }
            let sql = batch_insert_statement(&self.meta, &rows);
            affected += self.db.execute(&sql, &[]).await?;
        }
        Ok(affected)
    }

    /// Run raw SQL. Statements beginning with `SELECT` (case-insensitive)
    /// run as queries and the row set deserializes into `R`; anything else
    /// runs as an update and the row count is funneled into `R`.
    pub async fn execute<R: DeserializeOwned>(&self, sql: &str) -> Result<R, AppError> {
        if is_select(sql) {
            let rows = self.db.fetch_all(sql, &[]).await?;
            serde_json::from_value(Value::Array(rows)).map_err(AppError::from)
        } else {
            let count = self.db.execute(sql, &[]).await?;
            serde_json::from_value(Value::from(count)).map_err(AppError::from)
        }
    }

    /// A fresh query builder over this entity's table, sharing this
    /// repository's storage context.
    pub fn query(&self) -> QueryBuilder<E> {
        QueryBuilder::new(self.db.clone())
    }
}

fn entity_map<E: Entity>(entity: &E) -> Result<Map<String, Value>, AppError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Internal("entity must serialize to an object".into())),
    }
}

/// Declared-order (column, value) pairs for the entity's non-null fields.
fn non_null_pairs(
    meta: &EntityDescriptor,
    map: &Map<String, Value>,
    skip_id: bool,
) -> Vec<(String, Value)> {
    meta.columns
        .iter()
        .filter(|c| !(skip_id && Some(c.field.as_str()) == meta.id_field.as_deref()))
        .filter_map(|c| match map.get(&c.field) {
            Some(v) if !v.is_null() => Some((c.column.clone(), v.clone())),
            _ => None,
        })
        .collect()
}

fn insert_statement(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn update_statement(table: &str, columns: &[&str], id_column: &str) -> String {
    let sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", c, i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        sets.join(", "),
        id_column,
        columns.len() + 1
    )
}

fn batch_insert_statement(meta: &EntityDescriptor, rows: &[Map<String, Value>]) -> String {
    let columns: Vec<&str> = meta.columns.iter().map(|c| c.column.as_str()).collect();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = meta
                .columns
                .iter()
                .map(|c| batch_literal(row.get(&c.field).unwrap_or(&Value::Null)))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        meta.table,
        columns.join(", "),
        tuples.join(", ")
    )
}

/// Inline literal for batch insert: strings quoted with embedded quotes
/// doubled, numbers and booleans raw, arrays rendered as `'{v1,v2}'`,
/// objects as their quoted JSON text.
fn batch_literal(v: &Value) -> String {
    fn escape(s: &str) -> String {
        s.replace('\'', "''")
    }
    match v {
        Value::Null => "NULL".into(),
        Value::Bool(_) | Value::Number(_) => v.to_string(),
        Value::String(s) => format!("'{}'", escape(s)),
        Value::Array(items) => {
            if items.is_empty() {
                "'{}'".into()
            } else {
                let parts: Vec<String> = items
                    .iter()
                    .map(|i| match i {
                        Value::String(s) => escape(s),
                        Value::Null => "NULL".into(),
                        other => escape(&other.to_string()),
                    })
                    .collect();
                format!("'{{{}}}'", parts.join(","))
            }
        }
        Value::Object(_) => format!("'{}'", escape(&v.to_string())),
    }
}

fn is_select(sql: &str) -> bool {
    let head = sql.trim_start();
    head.get(..6).is_some_and(|s| s.eq_ignore_ascii_case("SELECT"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::meta::FieldDef;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Default)]
    struct Parcel {
        id: Option<i64>,
        label: Option<String>,
        weight: Option<f64>,
        tags: Option<Vec<String>>,
    }

    impl Entity for Parcel {
        fn type_name() -> &'static str {
            "Parcel"
        }
        fn fields() -> &'static [FieldDef] {
            const FIELDS: &[FieldDef] = &[
                FieldDef::id("id"),
                FieldDef::new("label"),
                FieldDef::new("weight"),
                FieldDef::new("tags"),
            ];
            FIELDS
        }
    }

    fn meta() -> Arc<EntityDescriptor> {
        descriptor::<Parcel>()
    }

    #[test]
    fn insert_uses_only_non_null_fields_and_skips_id() {
        let parcel = Parcel {
            id: Some(9),
            label: Some("crate".into()),
            weight: None,
            tags: None,
        };
        let map = entity_map(&parcel).unwrap();
        let pairs = non_null_pairs(&meta(), &map, true);
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, ["label"]);
        assert_eq!(
            insert_statement("parcel", &columns),
            "INSERT INTO parcel (label) VALUES ($1)"
        );
    }

    #[test]
    fn update_sets_only_non_null_fields() {
        let parcel = Parcel {
            id: Some(9),
            label: None,
            weight: Some(2.5),
            tags: None,
        };
        let map = entity_map(&parcel).unwrap();
        let pairs = non_null_pairs(&meta(), &map, true);
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, ["weight"]);
        assert_eq!(
            update_statement("parcel", &columns, "id"),
            "UPDATE parcel SET weight = $1 WHERE id = $2"
        );
    }

    #[test]
    fn batch_insert_covers_all_declared_fields() {
        let rows = vec![
            entity_map(&Parcel {
                id: Some(1),
                label: Some("a'b".into()),
                weight: Some(1.5),
                tags: Some(vec!["x".into(), "y".into()]),
            })
            .unwrap(),
            entity_map(&Parcel::default()).unwrap(),
        ];
        let sql = batch_insert_statement(&meta(), &rows);
        assert_eq!(
            sql,
            "INSERT INTO parcel (id, label, weight, tags) VALUES \
             (1, 'a''b', 1.5, '{x,y}'), (NULL, NULL, NULL, NULL)"
        );
    }

    #[test]
    fn select_detection_is_lexical_and_case_insensitive() {
        assert!(is_select("  select 1"));
        assert!(is_select("SELECT * FROM t"));
        assert!(!is_select("UPDATE t SET a = 1"));
        assert!(!is_select("sel"));
    }
}
