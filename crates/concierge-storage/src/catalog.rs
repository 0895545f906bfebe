//! Product catalog backed by the `products` table.
//!
//! Seeds the table from a JSON file and executes model-generated queries
//! after [`sanitize_query`] has reduced them to a single read-only
//! statement. Generated queries run with `query_only` set and an authorizer
//! that admits reads of `products` alone, so they cannot reach conversation
//! tables or the schema even when the catalog shares a database file.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use concierge_core::error::ConciergeError;

use crate::db::{storage_err, Database};

/// Catalog schema, as described to the query generator.
pub const PRODUCT_SCHEMA: &str = "Table: products\n\
Columns: id, product_link, title, brand, discount, avg_rating, total_ratings, availability, category, price";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("valid fence regex"));

static WRITE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|replace|attach|detach|pragma|vacuum|reindex|truncate)\b",
    )
    .expect("valid keyword regex")
});

static ILIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bilike\b").expect("valid ilike regex"));

static LEGACY_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(public\.)?amazon_product_data\b").expect("valid table regex")
});

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub product_link: Option<String>,
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub avg_rating: Option<f64>,
    #[serde(default)]
    pub total_ratings: Option<i64>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Reduce generated SQL to a single read-only statement for SQLite.
///
/// Strips markdown fences and a trailing semicolon, maps Postgres-only
/// syntax (`ILIKE`, the legacy table name) to SQLite, and rejects anything
/// that is not one `SELECT`/`WITH` statement.
pub fn sanitize_query(raw: &str) -> Result<String, ConciergeError> {
    let mut sql = raw.trim().to_string();
    if let Some(caps) = CODE_FENCE.captures(&sql) {
        sql = caps[1].to_string();
    }
    let sql = sql.trim().trim_end_matches(';').trim();

    if sql.is_empty() {
        return Err(ConciergeError::Catalog("Empty query".to_string()));
    }
    if sql.contains(';') {
        return Err(ConciergeError::Catalog(
            "Multiple statements are not allowed".to_string(),
        ));
    }
    let lowered = sql.to_ascii_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(ConciergeError::Catalog(format!(
            "Only SELECT queries are allowed: {}",
            sql
        )));
    }
    if let Some(m) = WRITE_KEYWORD.find(sql) {
        return Err(ConciergeError::Catalog(format!(
            "Query contains forbidden keyword '{}'",
            m.as_str()
        )));
    }

    let sql = ILIKE.replace_all(sql, "LIKE");
    let sql = LEGACY_TABLE.replace_all(&sql, "products");
    Ok(sql.into_owned())
}

/// Statement authorizer for generated queries.
fn products_only(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Select | AuthAction::Function { .. } => Authorization::Allow,
        AuthAction::Read { table_name, .. } if table_name.eq_ignore_ascii_case("products") => {
            Authorization::Allow
        }
        _ => Authorization::Deny,
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Read-mostly access to the product table.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    db: Arc<Database>,
    max_rows: usize,
}

impl ProductCatalog {
    pub fn new(db: Arc<Database>, max_rows: usize) -> Self {
        Self { db, max_rows }
    }

    pub fn count(&self) -> Result<usize, ConciergeError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| storage_err("Failed to count products", e))
        })
    }

    /// Insert products, but only into an empty table. Returns the number
    /// inserted.
    pub fn seed(&self, products: &[Product]) -> Result<usize, ConciergeError> {
        let existing = self.count()?;
        if existing > 0 {
            info!(existing, "Product catalog already seeded");
            return Ok(0);
        }

        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| storage_err("Failed to begin transaction", e))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO products (id, product_link, title, brand, discount, avg_rating,
                                               total_ratings, availability, category, price)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    )
                    .map_err(|e| storage_err("Failed to prepare insert", e))?;
                for p in products {
                    stmt.execute(params![
                        p.id,
                        p.product_link,
                        p.title,
                        p.brand,
                        p.discount,
                        p.avg_rating,
                        p.total_ratings,
                        p.availability,
                        p.category,
                        p.price,
                    ])
                    .map_err(|e| storage_err("Failed to insert product", e))?;
                }
            }
            tx.commit()
                .map_err(|e| storage_err("Failed to commit products", e))?;
            Ok(())
        })?;

        info!(count = products.len(), "Seeded product catalog");
        Ok(products.len())
    }

    /// Load products from a JSON array file and seed them.
    pub fn seed_from_file(&self, path: &Path) -> Result<usize, ConciergeError> {
        let content = std::fs::read_to_string(path)?;
        let products: Vec<Product> = serde_json::from_str(&content)?;
        self.seed(&products)
    }

    /// Sanitize and execute a query, returning at most `max_rows` rows as
    /// column-name keyed JSON objects.
    pub fn query(&self, raw_sql: &str) -> Result<Vec<Map<String, Value>>, ConciergeError> {
        let sql = sanitize_query(raw_sql)?;
        debug!(sql = %sql, "Executing catalog query");

        self.db.with_conn(|conn| {
            conn.execute_batch("PRAGMA query_only = ON")
                .map_err(|e| storage_err("Failed to enter read-only mode", e))?;
            conn.authorizer(Some(products_only));
            let result = self.read_rows(conn, &sql);
            conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
            conn.execute_batch("PRAGMA query_only = OFF")
                .map_err(|e| storage_err("Failed to leave read-only mode", e))?;
            result
        })
    }

    fn read_rows(
        &self,
        conn: &Connection,
        sql: &str,
    ) -> Result<Vec<Map<String, Value>>, ConciergeError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ConciergeError::Catalog(format!("Invalid query: {}", e)))?;
        if !stmt.readonly() {
            return Err(ConciergeError::Catalog(
                "Query would modify the catalog".to_string(),
            ));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query([])
            .map_err(|e| ConciergeError::Catalog(format!("Query failed: {}", e)))?;

        let mut results = Vec::new();
        while results.len() < self.max_rows {
            let Some(row) = rows
                .next()
                .map_err(|e| ConciergeError::Catalog(format!("Query failed: {}", e)))?
            else {
                break;
            };
            let mut record = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| ConciergeError::Catalog(format!("Read column: {}", e)))?;
                record.insert(name.clone(), to_json(value));
            }
            results.push(record);
        }
        Ok(results)
    }
}
