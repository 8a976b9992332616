//! PostgreSQL [`StoreClient`].
//!
//! One wide table, one column per schema attribute, with a composite
//! primary key on `("_pk", "_sk")` and a btree index on `("_pk", "_lsik")`
//! standing in for the secondary sort attribute. Conditional writes map to
//! `ON CONFLICT DO NOTHING` and predicated `UPDATE ... RETURNING`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::store::{
    Condition, Document, QueryIndex, RangeQuery, StoreClient, Update, Value, ATTR_LSIK, ATTR_PK,
    ATTR_SK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    BigInt,
    Bytea,
}

const COLUMNS: &[(&str, ColumnType)] = &[
    ("_pk", ColumnType::Text),
    ("_sk", ColumnType::Text),
    ("_lsik", ColumnType::Text),
    ("_nspace", ColumnType::Text),
    ("_kid", ColumnType::Text),
    ("_key", ColumnType::Bytea),
    ("_state", ColumnType::Text),
    ("_createdAt", ColumnType::BigInt),
    ("_enabledAt", ColumnType::BigInt),
    ("_disabledAt", ColumnType::BigInt),
    ("_deletedAt", ColumnType::BigInt),
    ("_at", ColumnType::BigInt),
    ("_tkn", ColumnType::Text),
    ("_tknv", ColumnType::Text),
];

fn column_type(attr: &str) -> Result<ColumnType, StoreError> {
    COLUMNS
        .iter()
        .find(|(name, _)| *name == attr)
        .map(|(_, ty)| *ty)
        .ok_or_else(|| StoreError::Backend(format!("unknown attribute: {attr}")))
}

fn quote(attr: &str) -> String {
    format!("\"{attr}\"")
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_value<'q>(
    query: PgQuery<'q>,
    value: &Value,
    ty: ColumnType,
) -> Result<PgQuery<'q>, StoreError> {
    let query = match (value, ty) {
        (Value::S(s), ColumnType::Text) => query.bind(s.clone()),
        (Value::N(n), ColumnType::BigInt) => query.bind(*n),
        (Value::B(b), ColumnType::Bytea) => query.bind(b.clone()),
        (Value::Null, ColumnType::Text) => query.bind(Option::<String>::None),
        (Value::Null, ColumnType::BigInt) => query.bind(Option::<i64>::None),
        (Value::Null, ColumnType::Bytea) => query.bind(Option::<Vec<u8>>::None),
        (value, ty) => {
            return Err(StoreError::Backend(format!(
                "attribute value {value:?} does not match column type {ty:?}"
            )))
        }
    };
    Ok(query)
}

fn row_to_document(row: &PgRow, attrs: &[&str]) -> Result<Document, StoreError> {
    let mut doc = Document::new();
    for attr in attrs {
        let value = match column_type(attr)? {
            ColumnType::Text => row
                .try_get::<Option<String>, _>(*attr)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(Value::S),
            ColumnType::BigInt => row
                .try_get::<Option<i64>, _>(*attr)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(Value::N),
            ColumnType::Bytea => row
                .try_get::<Option<Vec<u8>>, _>(*attr)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(Value::B),
        };
        if let Some(value) = value {
            doc.insert(attr.to_string(), value);
        }
    }
    Ok(doc)
}

/// PostgreSQL-backed document store client.
pub struct PostgresStoreClient {
    pool: PgPool,
    table: String,
}

impl PostgresStoreClient {
    /// Uses the default `pii_store` table.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: "pii_store".to_string(),
        }
    }

    /// Uses a custom table name (letters, digits and underscores only).
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(StoreError::Backend(format!("invalid table name: {table}")));
        }
        Ok(Self { pool, table })
    }

    /// Creates the table and the secondary index when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let table = &self.table;
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                "_pk" TEXT NOT NULL,
                "_sk" TEXT COLLATE "C" NOT NULL,
                "_lsik" TEXT COLLATE "C",
                "_nspace" TEXT,
                "_kid" TEXT,
                "_key" BYTEA,
                "_state" TEXT,
                "_createdAt" BIGINT,
                "_enabledAt" BIGINT,
                "_disabledAt" BIGINT,
                "_deletedAt" BIGINT,
                "_at" BIGINT,
                "_tkn" TEXT,
                "_tknv" TEXT,
                PRIMARY KEY ("_pk", "_sk")
            )
            "#
        );
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let index = format!(
            r#"CREATE INDEX IF NOT EXISTS {table}_lsik ON {table} ("_pk", "_lsik")"#
        );
        sqlx::query(&index)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn condition_sql(
    condition: &Condition,
    params: &mut Vec<Value>,
    next_param: &mut usize,
) -> Result<String, StoreError> {
    match condition {
        Condition::None | Condition::Exists => Ok(String::new()),
        Condition::Equals(attr, value) => {
            column_type(attr)?;
            params.push(value.clone());
            let sql = format!(" AND {} = ${}", quote(attr), next_param);
            *next_param += 1;
            Ok(sql)
        }
        Condition::NotEquals(attr, value) => {
            column_type(attr)?;
            params.push(value.clone());
            let sql = format!(" AND {} IS DISTINCT FROM ${}", quote(attr), next_param);
            *next_param += 1;
            Ok(sql)
        }
        Condition::NotExists => Err(StoreError::Backend(
            "NotExists is only supported on put".to_string(),
        )),
    }
}

#[async_trait]
impl StoreClient for PostgresStoreClient {
    async fn put_item(&self, item: Document, condition: Condition) -> Result<(), StoreError> {
        let mut attrs: Vec<&str> = Vec::new();
        let mut values: Vec<&Value> = Vec::new();
        for (name, _) in COLUMNS {
            if let Some(value) = item.get(*name) {
                attrs.push(name);
                values.push(value);
            }
        }
        if !item.contains_key(ATTR_PK) || !item.contains_key(ATTR_SK) {
            return Err(StoreError::Backend("item is missing _pk/_sk".to_string()));
        }

        let columns: Vec<String> = attrs.iter().map(|a| quote(a)).collect();
        let placeholders: Vec<String> = (1..=attrs.len()).map(|i| format!("${i}")).collect();

        let conflict = match condition {
            Condition::NotExists => r#"ON CONFLICT ("_pk", "_sk") DO NOTHING"#.to_string(),
            Condition::None => {
                let assignments: Vec<String> = attrs
                    .iter()
                    .filter(|a| **a != ATTR_PK && **a != ATTR_SK)
                    .map(|a| format!("{q} = EXCLUDED.{q}", q = quote(a)))
                    .collect();
                if assignments.is_empty() {
                    r#"ON CONFLICT ("_pk", "_sk") DO NOTHING"#.to_string()
                } else {
                    format!(
                        r#"ON CONFLICT ("_pk", "_sk") DO UPDATE SET {}"#,
                        assignments.join(", ")
                    )
                }
            }
            other => {
                return Err(StoreError::Backend(format!(
                    "unsupported put condition: {other:?}"
                )))
            }
        };

        let sql = format!(
            "INSERT INTO {table} ({cols}) VALUES ({vals}) {conflict}",
            table = self.table,
            cols = columns.join(", "),
            vals = placeholders.join(", "),
        );

        let mut query = sqlx::query(&sql);
        for (value, attr) in values.iter().zip(&attrs) {
            query = bind_value(query, value, column_type(attr)?)?;
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if condition == Condition::NotExists && result.rows_affected() == 0 {
            return Err(StoreError::ConditionFailed);
        }
        Ok(())
    }

    async fn update_item(
        &self,
        pk: &str,
        sk: &str,
        update: Update,
        condition: Condition,
    ) -> Result<Document, StoreError> {
        // Unlike a document store's upsert-update, this UPDATE never
        // creates a row; every engine call sites an existence-implying
        // condition, so the behaviors agree.
        let mut params: Vec<Value> = vec![Value::S(pk.to_string()), Value::S(sk.to_string())];
        let mut next_param = 3usize;

        let mut assignments: Vec<String> = Vec::new();
        let mut returned: Vec<&str> = Vec::new();
        for (attr, value) in &update.set {
            column_type(attr)?;
            assignments.push(format!("{} = ${}", quote(attr), next_param));
            params.push(value.clone());
            next_param += 1;
            returned.push(attr);
        }
        for (attr, value) in &update.set_if_not_exists {
            let q = quote(attr);
            column_type(attr)?;
            assignments.push(format!("{q} = COALESCE({q}, ${next_param})"));
            params.push(value.clone());
            next_param += 1;
            returned.push(attr);
        }
        for attr in &update.remove {
            column_type(attr)?;
            assignments.push(format!("{} = NULL", quote(attr)));
        }
        if assignments.is_empty() {
            assignments.push(format!("{q} = {q}", q = quote(ATTR_SK)));
        }

        let condition_sql = condition_sql(&condition, &mut params, &mut next_param)?;
        let returning: Vec<String> = returned.iter().map(|a| quote(a)).collect();
        let returning = if returning.is_empty() {
            quote(ATTR_SK)
        } else {
            returning.join(", ")
        };

        let sql = format!(
            r#"UPDATE {table} SET {sets} WHERE "_pk" = $1 AND "_sk" = $2{cond} RETURNING {ret}"#,
            table = self.table,
            sets = assignments.join(", "),
            cond = condition_sql,
            ret = returning,
        );

        let mut query = sqlx::query(&sql);
        let mut types: Vec<ColumnType> = vec![ColumnType::Text, ColumnType::Text];
        for (attr, _) in &update.set {
            types.push(column_type(attr)?);
        }
        for (attr, _) in &update.set_if_not_exists {
            types.push(column_type(attr)?);
        }
        match &condition {
            Condition::Equals(attr, _) | Condition::NotEquals(attr, _) => {
                types.push(column_type(attr)?);
            }
            _ => {}
        }
        for (value, ty) in params.iter().zip(types) {
            query = bind_value(query, value, ty)?;
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::ConditionFailed)?;

        if returned.is_empty() {
            return Ok(Document::new());
        }
        row_to_document(&row, &returned)
    }

    async fn delete_item(
        &self,
        pk: &str,
        sk: &str,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let mut params: Vec<Value> = vec![Value::S(pk.to_string()), Value::S(sk.to_string())];
        let mut next_param = 3usize;
        let condition_sql = condition_sql(&condition, &mut params, &mut next_param)?;

        let sql = format!(
            r#"DELETE FROM {table} WHERE "_pk" = $1 AND "_sk" = $2{cond}"#,
            table = self.table,
            cond = condition_sql,
        );

        let mut query = sqlx::query(&sql);
        let mut types: Vec<ColumnType> = vec![ColumnType::Text, ColumnType::Text];
        if let Condition::Equals(attr, _) | Condition::NotEquals(attr, _) = &condition {
            types.push(column_type(attr)?);
        }
        for (value, ty) in params.iter().zip(types) {
            query = bind_value(query, value, ty)?;
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 && condition != Condition::None {
            return Err(StoreError::ConditionFailed);
        }
        Ok(())
    }

    async fn query(&self, query: RangeQuery) -> Result<Vec<Document>, StoreError> {
        let sort_column = match query.index {
            QueryIndex::SortKey => ATTR_SK,
            QueryIndex::Secondary => ATTR_LSIK,
        };

        let mut sql = format!(
            r#"SELECT * FROM {table} WHERE "_pk" = $1"#,
            table = self.table
        );
        let mut params: Vec<Value> = vec![Value::S(query.partition.clone())];

        if query.index == QueryIndex::Secondary {
            sql.push_str(&format!(" AND {} IS NOT NULL", quote(sort_column)));
        }
        if let Some((start, end)) = &query.range {
            sql.push_str(&format!(
                " AND {col} BETWEEN ${a} AND ${b}",
                col = quote(sort_column),
                a = params.len() + 1,
                b = params.len() + 2
            ));
            params.push(Value::S(start.clone()));
            params.push(Value::S(end.clone()));
        }

        let mut in_values: Option<Vec<String>> = None;
        if let Some((attr, values)) = &query.filter_in {
            if column_type(attr)? != ColumnType::Text {
                return Err(StoreError::Backend(
                    "filter_in only supports text attributes".to_string(),
                ));
            }
            let strings: Vec<String> = values
                .iter()
                .map(|v| {
                    v.as_s()
                        .map(str::to_string)
                        .ok_or_else(|| StoreError::Backend("filter_in value must be text".into()))
                })
                .collect::<Result<_, _>>()?;
            sql.push_str(&format!(
                " AND {col} = ANY(${n})",
                col = quote(attr),
                n = params.len() + 1
            ));
            in_values = Some(strings);
        }
        sql.push_str(&format!(" ORDER BY {}", quote(sort_column)));

        let mut q = sqlx::query(&sql);
        for value in &params {
            q = bind_value(q, value, ColumnType::Text)?;
        }
        if let Some(values) = in_values {
            q = q.bind(values);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let attrs: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
        rows.iter().map(|row| row_to_document(row, &attrs)).collect()
    }
}

/// Convenience constructor for the durable engines over one shared pool.
pub async fn connect(url: &str) -> Result<Arc<PostgresStoreClient>, StoreError> {
    let pool = PgPool::connect(url)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let client = PostgresStoreClient::new(pool);
    client.ensure_schema().await?;
    Ok(Arc::new(client))
}
