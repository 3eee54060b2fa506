//! Compiles filters, query specs and mutation payloads into parameterized PostgreSQL.
//! Identifiers come from the model only and are always quoted; values are always bound.

use crate::schema::{EntityDescriptor, FieldDescriptor, FieldType, ModelMap, RelationDescriptor};
use crate::query::{Condition, Direction, Filter, Predicate, QuerySpec};
use crate::sql::params::{pg_cast, PgBindValue};
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";
const REL_ALIAS: &str = "rel";
const JOIN_ALIAS: &str = "lnk";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    /// Bind `value` and return its placeholder, cast to the column type when known.
    fn placeholder(&mut self, value: &Value, field: Option<&FieldDescriptor>) -> String {
        let list = field.map(|f| f.is_list).unwrap_or(false);
        self.params.push(if list {
            PgBindValue::list_from_json(value)
        } else {
            PgBindValue::from_json(value)
        });
        let n = self.params.len();
        match field.and_then(|f| pg_cast(&f.field_type)) {
            Some(cast) if list => format!("${}::{}[]", n, cast),
            Some(cast) => format!("${}::{}", n, cast),
            None => format!("${}", n),
        }
    }
}

/// Implicit join table for a many-to-many pair: `_<X>To<Y>` with model names sorted,
/// column `A` referencing X and `B` referencing Y.
pub struct JoinTable {
    pub table: String,
    pub owner_column: &'static str,
    pub target_column: &'static str,
}

impl JoinTable {
    pub fn between(owner_model: &str, target_model: &str) -> Self {
        let (first, second, owner_first) = if owner_model <= target_model {
            (owner_model, target_model, true)
        } else {
            (target_model, owner_model, false)
        };
        JoinTable {
            table: format!("_{}To{}", first, second),
            owner_column: if owner_first { "A" } else { "B" },
            target_column: if owner_first { "B" } else { "A" },
        }
    }
}

pub struct SqlCompiler<'a> {
    model: &'a ModelMap,
    schema: &'a str,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(model: &'a ModelMap, schema: &'a str) -> Self {
        SqlCompiler { model, schema }
    }

    fn table(&self, entity: &EntityDescriptor) -> String {
        self.table_named(&entity.model_name)
    }

    fn table_named(&self, table: &str) -> String {
        format!("{}.{}", quoted(self.schema), quoted(table))
    }

    fn target(&self, name: &str) -> Option<&'a EntityDescriptor> {
        self.model.get(name)
    }

    /// Column expression for reading; text-like and numeric columns come back as text.
    fn column_expr(alias: &str, field: &FieldDescriptor) -> String {
        let col = format!("{}.{}", alias, quoted(&field.name));
        match field.field_type {
            FieldType::String | FieldType::Decimal if !field.is_list => format!("{}::text", col),
            FieldType::Native(_) if field.is_list => format!("{}::text[]", col),
            FieldType::Native(_) => format!("{}::text", col),
            _ => col,
        }
    }

    fn column_list(alias: &str, entity: &EntityDescriptor, select: Option<&std::collections::BTreeSet<String>>) -> Vec<String> {
        entity
            .columns()
            .filter(|f| select.map(|s| s.contains(&f.name)).unwrap_or(true))
            .map(|f| format!("{} AS {}", Self::column_expr(alias, f), quoted(&f.name)))
            .collect()
    }

    fn returning(entity: &EntityDescriptor, alias: &str) -> String {
        Self::column_list(alias, entity, None).join(", ")
    }

    pub fn count(&self, entity: &EntityDescriptor, filter: &Filter) -> QueryBuf {
        let mut q = QueryBuf::new();
        let where_clause = self.where_clause(&mut q, entity, filter);
        q.sql = format!(
            "SELECT COUNT(*) AS {} FROM {} {}{}",
            quoted("count"),
            self.table(entity),
            MAIN_ALIAS,
            where_clause
        );
        q
    }

    /// SELECT with includes as scalar subqueries (row_to_json for to-one, json_agg for to-many).
    pub fn select(&self, entity: &EntityDescriptor, spec: &QuerySpec) -> QueryBuf {
        let mut q = QueryBuf::new();
        let mut parts = Self::column_list(MAIN_ALIAS, entity, spec.select.as_ref());
        for accessor in &spec.include {
            if let Some(sub) = self.include_subquery(entity, accessor) {
                parts.push(format!("{} AS {}", sub, quoted(accessor)));
            }
        }
        if parts.is_empty() {
            parts.push(format!("{}.{}", MAIN_ALIAS, quoted("id")));
        }
        let where_clause = self.where_clause(&mut q, entity, &spec.filter);
        let order_clause = spec
            .order_by
            .as_ref()
            .filter(|o| entity.field(&o.field).map(FieldDescriptor::is_column).unwrap_or(false))
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!(" ORDER BY {}.{} {}", MAIN_ALIAS, quoted(&o.field), dir)
            })
            .unwrap_or_default();
        let limit_clause = spec.take.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let offset_clause = if spec.skip > 0 {
            format!(" OFFSET {}", spec.skip)
        } else {
            String::new()
        };
        q.sql = format!(
            "SELECT {} FROM {} {}{}{}{}{}",
            parts.join(", "),
            self.table(entity),
            MAIN_ALIAS,
            where_clause,
            order_clause,
            limit_clause,
            offset_clause
        );
        q
    }

    fn include_subquery(&self, entity: &EntityDescriptor, accessor: &str) -> Option<String> {
        if let Some((_, relation)) = entity.relation_by_accessor(accessor) {
            let target = self.target(relation.target())?;
            let cols = Self::returning(target, REL_ALIAS);
            return Some(match relation {
                RelationDescriptor::OneToMany { foreign_field, .. } => format!(
                    "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} {} WHERE {}.{} = {}.{}) sub)",
                    cols,
                    self.table(target),
                    REL_ALIAS,
                    REL_ALIAS,
                    quoted("id"),
                    MAIN_ALIAS,
                    quoted(foreign_field)
                ),
                RelationDescriptor::ManyToMany { .. } => {
                    let join = JoinTable::between(&entity.model_name, &target.model_name);
                    format!(
                        "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} {} JOIN {} {} ON {}.{} = {}.{} WHERE {}.{} = {}.{}) sub)",
                        cols,
                        self.table(target),
                        REL_ALIAS,
                        self.table_named(&join.table),
                        JOIN_ALIAS,
                        REL_ALIAS,
                        quoted("id"),
                        JOIN_ALIAS,
                        quoted(join.target_column),
                        JOIN_ALIAS,
                        quoted(join.owner_column),
                        MAIN_ALIAS,
                        quoted("id")
                    )
                }
            });
        }
        let inverse = entity.inverse.get(accessor)?;
        let source = self.target(&inverse.source)?;
        Some(format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} {} WHERE {}.{} = {}.{}) sub)",
            Self::returning(source, REL_ALIAS),
            self.table(source),
            REL_ALIAS,
            REL_ALIAS,
            quoted(&inverse.foreign_field),
            MAIN_ALIAS,
            quoted("id")
        ))
    }

    fn where_clause(&self, q: &mut QueryBuf, entity: &EntityDescriptor, filter: &Filter) -> String {
        let mut parts: Vec<String> = filter
            .conditions
            .iter()
            .map(|(field, c)| condition_sql(q, MAIN_ALIAS, entity.field(field), field, c))
            .collect();
        if !filter.any.is_empty() {
            let any: Vec<String> = filter.any.iter().map(|p| self.predicate_sql(q, entity, p)).collect();
            parts.push(format!("({})", any.join(" OR ")));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    fn predicate_sql(&self, q: &mut QueryBuf, entity: &EntityDescriptor, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Field { field, condition } => condition_sql(q, MAIN_ALIAS, entity.field(field), field, condition),
            Predicate::Related {
                relation,
                field,
                condition,
            } => self
                .related_exists(q, entity, relation, field, condition)
                .unwrap_or_else(|| "FALSE".to_string()),
        }
    }

    /// EXISTS subquery over the rows reachable through `accessor`.
    fn related_exists(
        &self,
        q: &mut QueryBuf,
        entity: &EntityDescriptor,
        accessor: &str,
        field: &str,
        condition: &Condition,
    ) -> Option<String> {
        if let Some((_, relation)) = entity.relation_by_accessor(accessor) {
            let target = self.target(relation.target())?;
            let cond = condition_sql(q, REL_ALIAS, target.field(field), field, condition);
            return Some(match relation {
                RelationDescriptor::OneToMany { foreign_field, .. } => format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {}.{} AND {})",
                    self.table(target),
                    REL_ALIAS,
                    REL_ALIAS,
                    quoted("id"),
                    MAIN_ALIAS,
                    quoted(foreign_field),
                    cond
                ),
                RelationDescriptor::ManyToMany { .. } => {
                    let join = JoinTable::between(&entity.model_name, &target.model_name);
                    format!(
                        "EXISTS (SELECT 1 FROM {} {} JOIN {} {} ON {}.{} = {}.{} WHERE {}.{} = {}.{} AND {})",
                        self.table(target),
                        REL_ALIAS,
                        self.table_named(&join.table),
                        JOIN_ALIAS,
                        REL_ALIAS,
                        quoted("id"),
                        JOIN_ALIAS,
                        quoted(join.target_column),
                        JOIN_ALIAS,
                        quoted(join.owner_column),
                        MAIN_ALIAS,
                        quoted("id"),
                        cond
                    )
                }
            });
        }
        let inverse = entity.inverse.get(accessor)?;
        let source = self.target(&inverse.source)?;
        let cond = condition_sql(q, REL_ALIAS, source.field(field), field, condition);
        Some(format!(
            "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {}.{} AND {})",
            self.table(source),
            REL_ALIAS,
            REL_ALIAS,
            quoted(&inverse.foreign_field),
            MAIN_ALIAS,
            quoted("id"),
            cond
        ))
    }

    /// INSERT of the scalar columns present in `fields`.
    pub fn insert(&self, entity: &EntityDescriptor, fields: &Map<String, Value>) -> QueryBuf {
        let mut q = QueryBuf::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for f in entity.columns() {
            if let Some(v) = fields.get(&f.name) {
                cols.push(quoted(&f.name));
                values.push(q.placeholder(v, Some(f)));
            }
        }
        let table = format!("{} AS {}", self.table(entity), MAIN_ALIAS);
        let returning = Self::returning(entity, MAIN_ALIAS);
        q.sql = if cols.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                table,
                cols.join(", "),
                values.join(", "),
                returning
            )
        };
        q
    }

    /// UPDATE of the scalar columns present in `fields` on the rows matching `filter`.
    /// With nothing to set this selects the matching row instead.
    pub fn update(&self, entity: &EntityDescriptor, filter: &Filter, fields: &Map<String, Value>) -> QueryBuf {
        let mut q = QueryBuf::new();
        let sets: Vec<String> = entity
            .columns()
            .filter(|f| f.name != "id")
            .filter_map(|f| {
                let v = fields.get(&f.name)?;
                Some(format!("{} = {}", quoted(&f.name), q.placeholder(v, Some(f))))
            })
            .collect();
        if sets.is_empty() {
            return self.select(entity, &QuerySpec {
                take: Some(1),
                ..QuerySpec::filtered(filter.clone())
            });
        }
        let where_clause = self.where_clause(&mut q, entity, filter);
        q.sql = format!(
            "UPDATE {} {} SET {}{} RETURNING {}",
            self.table(entity),
            MAIN_ALIAS,
            sets.join(", "),
            where_clause,
            Self::returning(entity, MAIN_ALIAS)
        );
        q
    }

    pub fn delete(&self, entity: &EntityDescriptor, filter: &Filter) -> QueryBuf {
        let mut q = QueryBuf::new();
        let where_clause = self.where_clause(&mut q, entity, filter);
        q.sql = format!(
            "DELETE FROM {} {}{} RETURNING {}",
            self.table(entity),
            MAIN_ALIAS,
            where_clause,
            Self::returning(entity, MAIN_ALIAS)
        );
        q
    }

    /// Insert join rows linking `owner_id` to each of `ids`; existing links are kept.
    pub fn link(&self, entity: &EntityDescriptor, target: &EntityDescriptor, owner_id: &Value, ids: &[Value]) -> QueryBuf {
        let mut q = QueryBuf::new();
        let join = JoinTable::between(&entity.model_name, &target.model_name);
        let owner_field = entity.field("id");
        let target_field = target.field("id");
        let rows: Vec<String> = ids
            .iter()
            .map(|id| {
                let a = q.placeholder(owner_id, owner_field);
                let b = q.placeholder(id, target_field);
                format!("({}, {})", a, b)
            })
            .collect();
        q.sql = format!(
            "INSERT INTO {} ({}, {}) VALUES {} ON CONFLICT DO NOTHING",
            self.table_named(&join.table),
            quoted(join.owner_column),
            quoted(join.target_column),
            rows.join(", ")
        );
        q
    }

    pub fn unlink(&self, entity: &EntityDescriptor, target: &EntityDescriptor, owner_id: &Value, ids: &[Value]) -> QueryBuf {
        let mut q = QueryBuf::new();
        let join = JoinTable::between(&entity.model_name, &target.model_name);
        let owner = q.placeholder(owner_id, entity.field("id"));
        let targets: Vec<String> = ids.iter().map(|id| q.placeholder(id, target.field("id"))).collect();
        q.sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} IN ({})",
            self.table_named(&join.table),
            quoted(join.owner_column),
            owner,
            quoted(join.target_column),
            targets.join(", ")
        );
        q
    }
}

/// Escape LIKE metacharacters so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

fn condition_sql(
    q: &mut QueryBuf,
    alias: &str,
    field: Option<&FieldDescriptor>,
    name: &str,
    condition: &Condition,
) -> String {
    if field.map(|f| !f.is_column()).unwrap_or(true) {
        return "FALSE".to_string();
    }
    let col = format!("{}.{}", alias, quoted(name));
    let list = field.map(|f| f.is_list).unwrap_or(false);
    match condition {
        Condition::Equals(Value::Null) => format!("{} IS NULL", col),
        Condition::Equals(v) if list && !v.is_array() => {
            format!("{} @> {}", col, q.placeholder(&Value::Array(vec![v.clone()]), field))
        }
        Condition::Equals(v) => format!("{} = {}", col, q.placeholder(v, field)),
        Condition::In(values) if values.is_empty() => "FALSE".to_string(),
        Condition::In(values) if list => {
            format!("{} && {}", col, q.placeholder(&Value::Array(values.clone()), field))
        }
        Condition::In(values) => {
            let scalar = field.map(|f| FieldDescriptor { is_list: false, ..f.clone() });
            let items: Vec<String> = values.iter().map(|v| q.placeholder(v, scalar.as_ref())).collect();
            format!("{} IN ({})", col, items.join(", "))
        }
        Condition::Contains(needle) => {
            format!("{}::text ILIKE {}", col, q.placeholder(&Value::String(like_pattern(needle)), None))
        }
        Condition::HasEvery(values) if values.is_empty() => "TRUE".to_string(),
        Condition::HasEvery(values) => {
            let list = field.map(|f| FieldDescriptor { is_list: true, ..f.clone() });
            format!("{} @> {}", col, q.placeholder(&Value::Array(values.clone()), list.as_ref()))
        }
    }
}
