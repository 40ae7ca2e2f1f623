//! Chained query accumulation compiled to SQL text.
//!
//! Conditions are kept in insertion order; assembly is deterministic:
//! `SELECT <cols-or-*> FROM <table-or-override> [WHERE ...] [GROUP BY ...]
//! [HAVING ...] [ORDER BY ...]`. Every WHERE-producing condition is joined
//! with AND regardless of kind; there is no OR and no parenthesization. This
//! is a known limitation of the builder, not something callers can work
//! around, so keep complex predicates in `Repository::execute`.
//!
//! Accumulated values are inlined into the SQL text single-quoted with
//! embedded quotes doubled (the fixed CRUD statements in `Repository` use
//! bound parameters instead).

use crate::db::meta::{descriptor, Entity};
use crate::db::tx::DbContext;
use crate::error::AppError;
use serde_json::Value;
use std::marker::PhantomData;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Like,
    In,
    NotIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// One accumulated query fragment.
#[derive(Clone, Debug)]
pub enum QueryCondition {
    Select { columns: String },
    From { table: String },
    Where { column: String, operator: Operator, value: Value },
    GroupBy { columns: String },
    Having { expression: String },
    OrderBy { columns: String, direction: SortDir },
}

/// Accumulates conditions against one entity type and compiles/executes them.
pub struct QueryBuilder<E: Entity> {
    db: Option<DbContext>,
    table: String,
    conditions: Vec<QueryCondition>,
    _marker: PhantomData<E>,
}

impl<E: Entity> QueryBuilder<E> {
    pub(crate) fn new(db: DbContext) -> Self {
        QueryBuilder {
            db: Some(db),
            table: descriptor::<E>().table.clone(),
            conditions: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// A builder that can compile SQL but not execute it. Useful for
    /// inspecting generated text.
    pub fn detached() -> Self {
        QueryBuilder {
            db: None,
            table: descriptor::<E>().table.clone(),
            conditions: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let joined = columns.into_iter().map(Into::into).collect::<Vec<_>>().join(",");
        self.conditions.push(QueryCondition::Select { columns: joined });
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.conditions.push(QueryCondition::From {
            table: table.to_string(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.eq_if(true, column, value)
    }

    pub fn eq_if(mut self, condition: bool, column: &str, value: impl Into<Value>) -> Self {
        if condition {
            self.conditions.push(QueryCondition::Where {
                column: column.to_string(),
                operator: Operator::Eq,
                value: value.into(),
            });
        }
        self
    }

    pub fn like(self, column: &str, value: &str) -> Self {
        self.push_like(column, format!("%{value}%"))
    }

    pub fn like_left(self, column: &str, value: &str) -> Self {
        self.push_like(column, format!("%{value}"))
    }

    pub fn like_right(self, column: &str, value: &str) -> Self {
        self.push_like(column, format!("{value}%"))
    }

    fn push_like(mut self, column: &str, pattern: String) -> Self {
        self.conditions.push(QueryCondition::Where {
            column: column.to_string(),
            operator: Operator::Like,
            value: Value::String(pattern),
        });
        self
    }

    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_in(column, Operator::In, values)
    }

    pub fn not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_in(column, Operator::NotIn, values)
    }

    fn push_in<I, V>(mut self, column: &str, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.conditions.push(QueryCondition::Where {
            column: column.to_string(),
            operator,
            value: Value::Array(values),
        });
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let joined = columns.into_iter().map(Into::into).collect::<Vec<_>>().join(",");
        self.conditions.push(QueryCondition::GroupBy { columns: joined });
        self
    }

    pub fn having(mut self, expression: &str) -> Self {
        self.conditions.push(QueryCondition::Having {
            expression: expression.to_string(),
        });
        self
    }

    pub fn order_by_asc<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_order(columns, SortDir::Asc)
    }

    pub fn order_by_desc<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_order(columns, SortDir::Desc)
    }

    fn push_order<I, S>(mut self, columns: I, direction: SortDir) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let joined = columns.into_iter().map(Into::into).collect::<Vec<_>>().join(",");
        self.conditions.push(QueryCondition::OrderBy {
            columns: joined,
            direction,
        });
        self
    }

    /// Compile the accumulated conditions to SQL text.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        let select = self.conditions.iter().find_map(|c| match c {
            QueryCondition::Select { columns } => Some(columns.as_str()),
            _ => None,
        });
        sql.push_str(select.unwrap_or("*"));

        let from = self.conditions.iter().find_map(|c| match c {
            QueryCondition::From { table } => Some(table.as_str()),
            _ => None,
        });
        sql.push_str(" FROM ");
        sql.push_str(from.unwrap_or(&self.table));

        let predicates: Vec<String> = self
            .conditions
            .iter()
            .filter_map(|c| match c {
                QueryCondition::Where {
                    column,
                    operator,
                    value,
                } => Some(render_predicate(column, *operator, value)),
                _ => None,
            })
            .collect();
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if let Some(columns) = self.conditions.iter().find_map(|c| match c {
            QueryCondition::GroupBy { columns } => Some(columns.as_str()),
            _ => None,
        }) {
            sql.push_str(" GROUP BY ");
            sql.push_str(columns);
        }

        if let Some(expression) = self.conditions.iter().find_map(|c| match c {
            QueryCondition::Having { expression } => Some(expression.as_str()),
            _ => None,
        }) {
            sql.push_str(" HAVING ");
            sql.push_str(expression);
        }

        let orderings: Vec<String> = self
            .conditions
            .iter()
            .filter_map(|c| match c {
                QueryCondition::OrderBy { columns, direction } => {
                    Some(format!("{} {}", columns, direction.as_str()))
                }
                _ => None,
            })
            .collect();
        if !orderings.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&orderings.join(", "));
        }

        sql
    }

    /// Execute and map every row to the entity type.
    pub async fn fetch_all(self) -> Result<Vec<E>, AppError> {
        let sql = self.to_sql();
        let db = self.context()?;
        let meta = descriptor::<E>();
        let rows = db.fetch_all(&sql, &[]).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(meta.row_to_entity_value(row)).map_err(AppError::from))
            .collect()
    }

    /// Execute and map the first row, if any.
    pub async fn fetch_one(self) -> Result<Option<E>, AppError> {
        let sql = self.to_sql();
        let db = self.context()?;
        let meta = descriptor::<E>();
        let row = db.fetch_all(&sql, &[]).await?.into_iter().next();
        row.map(|r| serde_json::from_value(meta.row_to_entity_value(r)).map_err(AppError::from))
            .transpose()
    }

    fn context(&self) -> Result<&DbContext, AppError> {
        self.db
            .as_ref()
            .ok_or_else(|| AppError::Internal("query builder has no storage context".into()))
    }
}

fn render_predicate(column: &str, operator: Operator, value: &Value) -> String {
    match operator {
        Operator::Eq => format!("{} = {}", column, quoted_literal(value)),
        Operator::Like => format!("{} LIKE {}", column, quoted_literal(value)),
        Operator::In | Operator::NotIn => {
            let elements = match value {
                Value::Array(items) => items.iter().map(in_element).collect::<Vec<_>>().join(","),
                other => in_element(other),
            };
            let keyword = if operator == Operator::In { "IN" } else { "NOT IN" };
            format!("{column} {keyword} ({elements})")
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}

/// Eq/LIKE values are always single-quoted, numbers included.
fn quoted_literal(v: &Value) -> String {
    format!("'{}'", escape(&value_text(v)))
}

/// IN-list elements: numbers and booleans stay raw, everything else is
/// quoted and escaped.
fn in_element(v: &Value) -> String {
    match v {
        Value::Number(_) | Value::Bool(_) => v.to_string(),
        other => quoted_literal(other),
    }
}
