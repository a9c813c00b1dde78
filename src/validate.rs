use snafu::Snafu;
use sqlx::{Pool, Postgres, Row};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Snafu)]
pub enum ValidationError {
    #[snafu(display("Invalid table name format: {}", name))]
    BadTableFormat { name: String },

    #[snafu(display("Invalid field name format: {}", name))]
    BadFieldFormat { name: String },

    #[snafu(display("Table name not found in catalog: {}", name))]
    UnknownTable { name: String },

    #[snafu(display("Field name not found in catalog: {}", name))]
    UnknownField { name: String },
}

type Result<T, E = ValidationError> = std::result::Result<T, E>;

/// Metadata tables the advisor itself reads and writes; always allowed.
const METADATA_TABLES: &[&str] = &[
    "genome_catalog",
    "expression_profile",
    "mutation_log",
    "query_stats",
];

/// Fields common to every table in the managed schema.
const COMMON_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

const SQL_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "table", "index", "where",
    "from", "and", "or", "not", "null", "true", "false", "order", "by", "group", "having", "limit",
    "offset",
];

/// Identifier whitelisting against the live catalog plus a keyword blacklist.
///
/// The caches are read-mostly: lookups take a read lock, (re)loads swap the
/// whole set under a write lock. When the catalog is empty the validator is
/// permissive so that a fresh install can bootstrap its first stats.
pub struct Validator {
    tables: RwLock<Option<HashSet<String>>>,
    fields: RwLock<Option<HashSet<String>>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(None),
            fields: RwLock::new(None),
        }
    }

    /// Load allowed identifiers from `genome_catalog`. Failure leaves the
    /// caches empty, which degrades to permissive bootstrap validation.
    pub async fn load_catalog(&self, pool: &Pool<Postgres>) {
        let rows = sqlx::query("SELECT DISTINCT table_name, field_name FROM genome_catalog")
            .fetch_all(pool)
            .await;

        match rows {
            Ok(rows) => {
                let mut tables: HashSet<String> =
                    METADATA_TABLES.iter().map(|t| t.to_string()).collect();
                let mut fields: HashSet<String> =
                    COMMON_FIELDS.iter().map(|f| f.to_string()).collect();
                for row in &rows {
                    let table: String = row.get("table_name");
                    let field: String = row.get("field_name");
                    tables.insert(table.to_lowercase());
                    fields.insert(field.to_lowercase());
                }
                debug!(
                    tables = tables.len(),
                    fields = fields.len(),
                    "loaded identifier catalog"
                );
                *self.tables.write().expect("validator lock poisoned") = Some(tables);
                *self.fields.write().expect("validator lock poisoned") = Some(fields);
            }
            Err(err) => {
                warn!("could not load genome_catalog, using metadata tables only: {err}");
            }
        }
    }

    pub fn clear_cache(&self) {
        *self.tables.write().expect("validator lock poisoned") = None;
        *self.fields.write().expect("validator lock poisoned") = None;
    }

    pub fn validate_table<'a>(&self, name: &'a str) -> Result<&'a str> {
        if !is_valid_identifier(name) {
            return Err(ValidationError::BadTableFormat { name: name.into() });
        }
        let lowered = name.to_lowercase();
        if METADATA_TABLES.contains(&lowered.as_str()) {
            return Ok(name);
        }

        let guard = self.tables.read().expect("validator lock poisoned");
        match guard.as_ref() {
            Some(tables) if tables.len() > METADATA_TABLES.len() => {
                if tables.contains(&lowered) {
                    Ok(name)
                } else {
                    Err(ValidationError::UnknownTable { name: name.into() })
                }
            }
            _ => {
                debug!(table = name, "catalog empty, allowing table (bootstrap)");
                Ok(name)
            }
        }
    }

    pub fn validate_field<'a>(&self, name: &'a str, _table: Option<&str>) -> Result<&'a str> {
        if !is_valid_identifier(name) {
            return Err(ValidationError::BadFieldFormat { name: name.into() });
        }
        let lowered = name.to_lowercase();
        if COMMON_FIELDS.contains(&lowered.as_str()) || lowered.starts_with("custom_") {
            return Ok(name);
        }

        let guard = self.fields.read().expect("validator lock poisoned");
        match guard.as_ref() {
            Some(fields) if fields.len() > COMMON_FIELDS.len() => {
                if fields.contains(&lowered) {
                    Ok(name)
                } else {
                    Err(ValidationError::UnknownField { name: name.into() })
                }
            }
            _ => {
                debug!(field = name, "catalog empty, allowing field (bootstrap)");
                Ok(name)
            }
        }
    }
}

/// Identifier format check: `[A-Za-z_][A-Za-z0-9_]*`, not a SQL keyword.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    !SQL_KEYWORDS.contains(&name.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("users", true)]
    #[case("_internal", true)]
    #[case("order_items2", true)]
    #[case("", false)]
    #[case("2fast", false)]
    #[case("users; drop", false)]
    #[case("select", false)]
    #[case("DROP", false)]
    fn identifier_format(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_valid_identifier(name), expected);
    }

    #[test]
    fn metadata_tables_always_allowed() {
        let validator = Validator::new();
        assert!(validator.validate_table("query_stats").is_ok());
        assert!(validator.validate_table("mutation_log").is_ok());
    }

    #[test]
    fn empty_catalog_is_permissive() {
        let validator = Validator::new();
        assert!(validator.validate_table("anything_goes").is_ok());
        assert!(validator.validate_field("some_field", None).is_ok());
    }

    #[test]
    fn loaded_catalog_rejects_unknown_names() {
        let validator = Validator::new();
        let mut tables: HashSet<String> = METADATA_TABLES.iter().map(|t| t.to_string()).collect();
        tables.insert("orders".into());
        let mut fields: HashSet<String> = COMMON_FIELDS.iter().map(|f| f.to_string()).collect();
        fields.insert("status".into());
        *validator.tables.write().unwrap() = Some(tables);
        *validator.fields.write().unwrap() = Some(fields);

        assert!(validator.validate_table("orders").is_ok());
        assert!(matches!(
            validator.validate_table("missing"),
            Err(ValidationError::UnknownTable { .. })
        ));
        assert!(validator.validate_field("status", Some("orders")).is_ok());
        assert!(matches!(
            validator.validate_field("missing", None),
            Err(ValidationError::UnknownField { .. })
        ));

        // Common fields and the custom_ escape hatch stay allowed.
        assert!(validator.validate_field("created_at", None).is_ok());
        assert!(validator.validate_field("custom_rank", None).is_ok());

        validator.clear_cache();
        assert!(validator.validate_table("missing").is_ok());
    }

    #[test]
    fn bad_format_rejected_before_catalog_lookup() {
        let validator = Validator::new();
        assert!(matches!(
            validator.validate_table("no spaces"),
            Err(ValidationError::BadTableFormat { .. })
        ));
        assert!(matches!(
            validator.validate_field("1st", None),
            Err(ValidationError::BadFieldFormat { .. })
        ));
    }
}
