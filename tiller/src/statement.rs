//! Lexical statement classification and table extraction
//!
//! This is intentionally not a SQL parser. The leading keyword decides the
//! statement kind and a single regex per verb pulls out the first referenced
//! table. The statement itself is passed through to the engine verbatim.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Kind of SQL statement as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Unknown,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Unknown => "UNKNOWN",
        }
    }

    /// Writes are the union {INSERT, UPDATE, DELETE}
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(self, StatementKind::Select)
    }
}

/// A classified statement: its kind and the first table it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedStatement {
    pub kind: StatementKind,
    pub table: Option<String>,
}

fn from_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bFROM\s+`?(\w+)`?").expect("valid regex"))
}

fn into_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bINTO\s+`?(\w+)`?").expect("valid regex"))
}

fn update_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^UPDATE\s+`?(\w+)`?").expect("valid regex"))
}

/// Classify a statement and extract the target table, if any.
///
/// Table names are lowercased so that `_table_timestamps` rows are keyed
/// consistently regardless of how the client spelled the name.
pub fn classify(statement: &str) -> ClassifiedStatement {
    let trimmed = statement.trim();
    let upper = trimmed.to_uppercase();

    let kind = if upper.starts_with("SELECT") {
        StatementKind::Select
    } else if upper.starts_with("INSERT") {
        StatementKind::Insert
    } else if upper.starts_with("UPDATE") {
        StatementKind::Update
    } else if upper.starts_with("DELETE") {
        StatementKind::Delete
    } else {
        StatementKind::Unknown
    };

    let table = match kind {
        StatementKind::Select | StatementKind::Delete => first_capture(from_table_re(), trimmed),
        StatementKind::Insert => first_capture(into_table_re(), trimmed),
        StatementKind::Update => first_capture(update_table_re(), trimmed),
        StatementKind::Unknown => None,
    };

    ClassifiedStatement { kind, table }
}

fn first_capture(re: &Regex, statement: &str) -> Option<String> {
    re.captures(statement)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_select() {
        let c = classify("SELECT * FROM users WHERE id = 1");
        assert_eq!(c.kind, StatementKind::Select);
        assert_eq!(c.table.as_deref(), Some("users"));
        assert!(c.kind.is_read());
        assert!(!c.kind.is_write());
    }

    #[test]
    fn test_classify_insert() {
        let c = classify("insert into Orders (id, total) values (1, 9.99)");
        assert_eq!(c.kind, StatementKind::Insert);
        assert_eq!(c.table.as_deref(), Some("orders"));
        assert!(c.kind.is_write());
    }

    #[test]
    fn test_classify_update() {
        let c = classify("UPDATE accounts SET balance = 0 WHERE id = 7");
        assert_eq!(c.kind, StatementKind::Update);
        assert_eq!(c.table.as_deref(), Some("accounts"));
    }

    #[test]
    fn test_classify_delete() {
        let c = classify("DELETE FROM sessions WHERE expired = 1");
        assert_eq!(c.kind, StatementKind::Delete);
        assert_eq!(c.table.as_deref(), Some("sessions"));
    }

    #[test]
    fn test_backticked_table_name() {
        let c = classify("SELECT name FROM `users`");
        assert_eq!(c.table.as_deref(), Some("users"));
    }

    #[test]
    fn test_leading_whitespace_and_case() {
        let c = classify("   sElEcT 1 from t1");
        assert_eq!(c.kind, StatementKind::Select);
        assert_eq!(c.table.as_deref(), Some("t1"));
    }

    #[test]
    fn test_unknown_statements() {
        assert_eq!(classify("").kind, StatementKind::Unknown);
        assert_eq!(classify("   ").kind, StatementKind::Unknown);
        assert_eq!(classify("CREATE TABLE t (id INT)").kind, StatementKind::Unknown);
        assert_eq!(classify("DROP TABLE t").kind, StatementKind::Unknown);
        assert_eq!(classify("EXPLAIN SELECT 1").kind, StatementKind::Unknown);
    }

    #[test]
    fn test_select_without_from_has_no_table() {
        let c = classify("SELECT 1");
        assert_eq!(c.kind, StatementKind::Select);
        assert_eq!(c.table, None);
    }
}
