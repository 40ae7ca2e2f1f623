//! Entity metadata: table name, identifier column, and the field/column map,
//! declared once per type and cached for the process lifetime. Mappings derive
//! from static type metadata, so invalidation is never required.

use crate::case::to_snake_case;
use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// One declared field of a storage-mapped type. `column: None` falls back to
/// the snake_case of the field name.
#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: Option<&'static str>,
    pub id: bool,
}

impl FieldDef {
    pub const fn new(name: &'static str) -> Self {
        FieldDef {
            name,
            column: None,
            id: false,
        }
    }

    pub const fn with_column(name: &'static str, column: &'static str) -> Self {
        FieldDef {
            name,
            column: Some(column),
            id: false,
        }
    }

    pub const fn id(name: &'static str) -> Self {
        FieldDef {
            name,
            column: None,
            id: true,
        }
    }

    pub const fn id_with_column(name: &'static str, column: &'static str) -> Self {
        FieldDef {
            name,
            column: Some(column),
            id: true,
        }
    }
}

/// A storage-mapped type. Implementations are hand-written registration code:
/// the metadata is compile-time verified, nothing is discovered at runtime.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Type name used for the table-name convention fallback.
    fn type_name() -> &'static str;

    /// Explicit table name; `None` falls back to snake_case of `type_name`.
    fn table() -> Option<&'static str> {
        None
    }

    /// Declared fields in order. Order determines column order in generated
    /// statements.
    fn fields() -> &'static [FieldDef];
}

#[derive(Clone, Debug)]
pub struct ColumnDef {
    pub field: String,
    pub column: String,
    pub id: bool,
}

/// Resolved table/identifier/column metadata for one entity type.
#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    pub table: String,
    /// Identifier field and column; `None` when the type declares no id and
    /// has no `id`-named field. Operations that need an identifier fail then.
    pub id_field: Option<String>,
    pub id_column: Option<String>,
    pub columns: Vec<ColumnDef>,
}

impl EntityDescriptor {
    fn build<E: Entity>() -> Self {
        let table = E::table()
            .map(str::to_string)
            .unwrap_or_else(|| to_snake_case(E::type_name()));
        let columns: Vec<ColumnDef> = E::fields()
            .iter()
            .map(|f| ColumnDef {
                field: f.name.to_string(),
                column: f
                    .column
                    .map(str::to_string)
                    .unwrap_or_else(|| to_snake_case(f.name)),
                id: f.id,
            })
            .collect();
        let id = columns
            .iter()
            .find(|c| c.id)
            .or_else(|| columns.iter().find(|c| c.field == "id"));
        let (id_field, id_column) = match id {
            Some(c) => (Some(c.field.clone()), Some(c.column.clone())),
            None => (None, None),
        };
        EntityDescriptor {
            table,
            id_field,
            id_column,
            columns,
        }
    }

    pub fn id_column(&self) -> Result<&str, AppError> {
        self.id_column
            .as_deref()
            .ok_or_else(|| AppError::domain("entity_error", "entity declares no identifier field"))
    }

    pub fn id_field(&self) -> Result<&str, AppError> {
        self.id_field
            .as_deref()
            .ok_or_else(|| AppError::domain("entity_error", "entity declares no identifier field"))
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.column.as_str())
    }

    /// Rename a row object's keys from column names back to field names so it
    /// deserializes into the entity type. Unknown keys pass through.
    pub fn row_to_entity_value(&self, row: Value) -> Value {
        let Value::Object(map) = row else { return row };
        let mut out = serde_json::Map::with_capacity(map.len());
        for (k, v) in map {
            let field = self
                .columns
                .iter()
                .find(|c| c.column == k)
                .map(|c| c.field.clone())
                .unwrap_or(k);
            out.insert(field, v);
        }
        Value::Object(out)
    }
}

fn descriptor_cache() -> &'static RwLock<HashMap<TypeId, Arc<EntityDescriptor>>> {
    static CACHE: OnceLock<RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Resolve (and memoize) the descriptor for an entity type. Read path is a
/// shared lock; the map is only written on first touch of a type.
pub fn descriptor<E: Entity>() -> Arc<EntityDescriptor> {
    let key = TypeId::of::<E>();
    if let Some(found) = descriptor_cache().read().expect("descriptor cache").get(&key) {
        return Arc::clone(found);
    }
    let built = Arc::new(EntityDescriptor::build::<E>());
    let mut cache = descriptor_cache().write().expect("descriptor cache");
    Arc::clone(cache.entry(key).or_insert(built))
}

fn statement_cache() -> &'static RwLock<HashMap<(TypeId, String), Arc<str>>> {
    static CACHE: OnceLock<RwLock<HashMap<(TypeId, String), Arc<str>>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Fetch a cached statement for an entity type, building it on first use.
/// Keys include the column subset for the statements whose shape depends on
/// which fields are set.
pub fn cached_statement<E: Entity>(key: &str, build: impl FnOnce() -> String) -> Arc<str> {
    let cache_key = (TypeId::of::<E>(), key.to_string());
    if let Some(found) = statement_cache().read().expect("statement cache").get(&cache_key) {
        return Arc::clone(found);
    }
    let built: Arc<str> = Arc::from(build());
    let mut cache = statement_cache().write().expect("statement cache");
    Arc::clone(cache.entry(cache_key).or_insert(built))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct CargoManifest {
        id: i64,
        display_name: Option<String>,
        owner: Option<String>,
    }

    impl Entity for CargoManifest {
        fn type_name() -> &'static str {
            "CargoManifest"
        }
        fn fields() -> &'static [FieldDef] {
            const FIELDS: &[FieldDef] = &[
                FieldDef::id("id"),
                FieldDef::with_column("display_name", "title"),
                FieldDef::new("owner"),
            ];
            FIELDS
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Anonymous {
        value: i32,
    }

    impl Entity for Anonymous {
        fn type_name() -> &'static str {
            "Anonymous"
        }
        fn fields() -> &'static [FieldDef] {
            const FIELDS: &[FieldDef] = &[FieldDef::new("value")];
            FIELDS
        }
    }

    #[test]
    fn table_and_id_fall_back_to_conventions() {
        let d = descriptor::<CargoManifest>();
        assert_eq!(d.table, "cargo_manifest");
        assert_eq!(d.id_column().unwrap(), "id");
        assert_eq!(d.column_for("display_name"), Some("title"));
        assert_eq!(d.column_for("owner"), Some("owner"));
    }

    #[test]
    fn missing_identifier_is_an_error_only_when_asked_for() {
        let d = descriptor::<Anonymous>();
        assert!(d.id_column().is_err());
        assert_eq!(d.table, "anonymous");
    }

    #[test]
    fn descriptor_is_memoized() {
        let a = descriptor::<CargoManifest>();
        let b = descriptor::<CargoManifest>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rows_are_renamed_to_field_names() {
        let d = descriptor::<CargoManifest>();
        let row = serde_json::json!({ "id": 1, "title": "x", "owner": null });
        let value = d.row_to_entity_value(row);
        let entity: CargoManifest = serde_json::from_value(value).unwrap();
        assert_eq!(entity.display_name.as_deref(), Some("x"));
        assert_eq!(entity.id, 1);
    }
}
