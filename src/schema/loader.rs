//! Load model definitions from a JSON file or by introspecting PostgreSQL.

use crate::case::decapitalize;
use crate::error::ConfigError;
use crate::schema::inference::{plural_accessor, Inflector};
use crate::schema::types::{ApiEntityConfig, FieldDefinition, ModelDefinition};
use indexmap::IndexMap;
use sqlx::PgPool;
use std::path::Path;

/// Read a JSON array of model definitions. A missing file yields no models.
pub async fn load_models_from_file(path: impl AsRef<Path>) -> Result<Vec<ModelDefinition>, ConfigError> {
    let path = path.as_ref();
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "schema file not found; starting with no models");
            return Ok(Vec::new());
        }
        Err(e) => return Err(ConfigError::Load(format!("{}: {}", path.display(), e))),
    };
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Read a JSON array of per-entity API configs.
pub async fn load_api_config_from_file(path: impl AsRef<Path>) -> Result<Vec<ApiEntityConfig>, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Introspect tables of `schema` into model definitions.
///
/// Columns become scalar fields. Relation accessors are added the way a schema
/// system reports them: a foreign key `Post.idTeam -> Team` adds `Team.posts`, and an
/// implicit join table `_PostToTag` adds `Post.tags` and `Tag.posts`.
pub async fn load_models_from_pool(
    pool: &PgPool,
    schema: &str,
    inflector: &dyn Inflector,
) -> Result<Vec<ModelDefinition>, ConfigError> {
    let sql = "SELECT table_name::text, column_name::text, data_type::text, udt_schema::text, udt_name::text \
               FROM information_schema.columns WHERE table_schema = $1 \
               ORDER BY table_name, ordinal_position";
    tracing::debug!(sql = %sql, schema = %schema, "query");
    let columns = sqlx::query_as::<_, ColumnRow>(sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let fk_sql = "SELECT kcu.table_name::text, kcu.column_name::text, ccu.table_name::text \
                  FROM information_schema.table_constraints tc \
                  JOIN information_schema.key_column_usage kcu \
                    ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                  JOIN information_schema.constraint_column_usage ccu \
                    ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
                  WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1";
    tracing::debug!(sql = %fk_sql, schema = %schema, "query");
    let foreign_keys = sqlx::query_as::<_, (String, String, String)>(fk_sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    Ok(assemble_models(columns, foreign_keys, inflector))
}

/// (table, column, data_type, udt_schema, udt_name)
type ColumnRow = (String, String, String, String, String);

fn assemble_models(
    columns: Vec<ColumnRow>,
    foreign_keys: Vec<(String, String, String)>,
    inflector: &dyn Inflector,
) -> Vec<ModelDefinition> {
    let mut tables: IndexMap<String, Vec<FieldDefinition>> = IndexMap::new();
    let mut join_tables: Vec<(String, String)> = Vec::new();
    for (table, column, data_type, udt_schema, udt_name) in columns {
        if let Some(pair) = join_table_models(&table) {
            if !join_tables.contains(&pair) {
                join_tables.push(pair);
            }
            continue;
        }
        let is_list = data_type.eq_ignore_ascii_case("ARRAY");
        let udt = udt_name.trim_start_matches('_');
        let mut field = FieldDefinition::new(column, scalar_tag(&udt_schema, udt));
        field.is_list = is_list;
        tables.entry(table).or_default().push(field);
    }

    let add_accessor = |tables: &mut IndexMap<String, Vec<FieldDefinition>>, owner: &str, other: &str| {
        let accessor = plural_accessor(inflector, &decapitalize(other));
        if let Some(fields) = tables.get_mut(owner) {
            if !fields.iter().any(|f| f.name == accessor) {
                fields.push(FieldDefinition::new(accessor, other).list());
            }
        }
    };
    for (table, _column, referenced) in &foreign_keys {
        if join_table_models(table).is_none() {
            add_accessor(&mut tables, referenced, table);
        }
    }
    for (a, b) in &join_tables {
        add_accessor(&mut tables, a, b);
        add_accessor(&mut tables, b, a);
    }

    tables
        .into_iter()
        .map(|(name, fields)| ModelDefinition::new(name, fields))
        .collect()
}

/// `_PostToTag` -> ("Post", "Tag").
fn join_table_models(table: &str) -> Option<(String, String)> {
    let rest = table.strip_prefix('_')?;
    let (a, b) = rest.split_once("To")?;
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a.to_string(), b.to_string()))
}

fn scalar_tag(udt_schema: &str, udt: &str) -> String {
    let tag = match udt {
        "int2" | "int4" => "Int",
        "int8" => "BigInt",
        "float4" | "float8" => "Float",
        "numeric" => "Decimal",
        "bool" => "Boolean",
        "timestamp" | "timestamptz" | "date" => "DateTime",
        "json" | "jsonb" => "Json",
        "bytea" => "Bytes",
        "uuid" => "Uuid",
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => "String",
        _ => return format!("native:{}.{}", udt_schema, udt),
    };
    tag.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::inference::EnglishInflector;

    fn col(t: &str, c: &str, udt: &str) -> ColumnRow {
        (t.into(), c.into(), "USER-DEFINED".into(), "pg_catalog".into(), udt.into())
    }

    #[test]
    fn foreign_keys_and_join_tables_add_accessors() {
        let columns = vec![
            col("Post", "id", "int4"),
            col("Post", "title", "text"),
            col("Post", "idTeam", "int4"),
            col("Team", "id", "int4"),
            col("Tag", "id", "int4"),
            col("_PostToTag", "A", "int4"),
            col("_PostToTag", "B", "int4"),
        ];
        let fks = vec![("Post".to_string(), "idTeam".to_string(), "Team".to_string())];
        let models = assemble_models(columns, fks, &EnglishInflector);
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["Post", "Team", "Tag"]);

        let post: Vec<_> = models[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(post, ["id", "title", "idTeam", "tags"]);
        let team: Vec<_> = models[1].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(team, ["id", "posts"]);
        assert!(models[2].fields.iter().any(|f| f.name == "posts" && f.is_list));
        assert_eq!(models[0].fields[0].type_, "Int");
    }

    #[test]
    fn unmapped_types_keep_their_database_name() {
        let columns = vec![
            col("Post", "id", "int4"),
            ("Post".into(), "status".into(), "USER-DEFINED".into(), "public".into(), "mood".into()),
            ("Post".into(), "moods".into(), "ARRAY".into(), "public".into(), "_mood".into()),
        ];
        let models = assemble_models(columns, Vec::new(), &EnglishInflector);
        let fields = &models[0].fields;
        assert_eq!(fields[1].type_, "native:public.mood");
        assert!(fields[2].is_list);
        assert_eq!(fields[2].type_, "native:public.mood");
        assert_eq!(scalar_tag("pg_catalog", "varchar"), "String");
    }

    #[test]
    fn join_table_names() {
        assert_eq!(join_table_models("_PostToTag"), Some(("Post".into(), "Tag".into())));
        assert_eq!(join_table_models("Post"), None);
        assert_eq!(join_table_models("_To"), None);
    }

    #[tokio::test]
    async fn missing_schema_file_is_empty() {
        let models = load_models_from_file("/nonexistent/relcrud-models.json").await.unwrap();
        assert!(models.is_empty());
    }
}
