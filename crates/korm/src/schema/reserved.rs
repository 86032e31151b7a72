//! Identifiers rejected at DDL-generation time.
//!
//! The list is the union of words reserved by SQLite, MySQL, PostgreSQL and
//! SQL Server that commonly collide with column names. `USER` is left out on
//! purpose: it is the conventional name of the account table.

use crate::error::{OrmError, OrmResult};

/// Sorted, upper-case.
pub const RESERVED_WORDS: &[&str] = &[
    "ABORT", "ABSOLUTE", "ACCESS", "ACTION", "ADD", "ALL", "ALLOCATE", "ALTER", "ANALYZE", "AND",
    "ANY", "ARE", "AS", "ASC", "ASENSITIVE", "ASSERTION", "ATTACH", "AUTHORIZATION",
    "AUTOINCREMENT", "AUTO_INCREMENT", "BACKUP", "BEFORE", "BEGIN", "BETWEEN", "BIGINT", "BINARY",
    "BLOB", "BOTH", "BREAK", "BROWSE", "BULK", "BY", "CALL", "CASCADE", "CASE", "CAST", "CHANGE",
    "CHAR", "CHARACTER", "CHECK", "CHECKPOINT", "CLOSE", "CLUSTERED", "COALESCE", "COLLATE",
    "COLUMN", "COMMIT", "COMPUTE", "CONDITION", "CONFLICT", "CONNECT", "CONSTRAINT", "CONTAINS",
    "CONTINUE", "CONVERT", "CREATE", "CROSS", "CURRENT", "CURRENT_DATE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DATABASE", "DATABASES", "DBCC", "DEALLOCATE",
    "DECIMAL", "DECLARE", "DEFAULT", "DEFERRABLE", "DEFERRED", "DELAYED", "DELETE", "DENY", "DESC",
    "DESCRIBE", "DETACH", "DISK", "DISTINCT", "DISTINCTROW", "DISTRIBUTED", "DIV", "DO", "DOUBLE",
    "DROP", "DUAL", "DUMP", "EACH", "ELSE", "ELSEIF", "ENCLOSED", "END", "ERRLVL", "ESCAPE",
    "ESCAPED", "EXCEPT", "EXCLUSIVE", "EXEC", "EXECUTE", "EXISTS", "EXIT", "EXPLAIN", "FAIL",
    "FALSE", "FETCH", "FILLFACTOR", "FLOAT", "FOR", "FORCE", "FOREIGN", "FREETEXT", "FROM", "FULL",
    "FULLTEXT", "FUNCTION", "GLOB", "GOTO", "GRANT", "GROUP", "HAVING", "HIGH_PRIORITY",
    "HOLDLOCK", "IDENTITY", "IDENTITY_INSERT", "IF", "IGNORE", "ILIKE", "IMMEDIATE", "IN",
    "INDEX", "INDEXED", "INFILE", "INITIALLY", "INNER", "INOUT", "INSENSITIVE", "INSERT",
    "INSTEAD", "INT", "INTEGER", "INTERSECT", "INTERVAL", "INTO", "IS", "ISNULL", "ITERATE",
    "JOIN", "KEY", "KEYS", "KILL", "LEADING", "LEAVE", "LEFT", "LIKE", "LIMIT", "LINENO",
    "LINES", "LOAD", "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LONG", "LOOP", "LOW_PRIORITY",
    "MATCH", "MERGE", "MINUS", "MODIFIES", "NATURAL", "NOCHECK", "NONCLUSTERED", "NOT", "NOTNULL",
    "NULL", "NULLIF", "NUMERIC", "OF", "OFF", "OFFSET", "OFFSETS", "ON", "ONLY", "OPEN",
    "OPENDATASOURCE", "OPENQUERY", "OPENROWSET", "OPTIMIZE", "OPTION", "OPTIONALLY", "OR",
    "ORDER", "OUT", "OUTER", "OUTFILE", "OVER", "PERCENT", "PIVOT", "PLAN", "PRAGMA",
    "PRECISION", "PRIMARY", "PRINT", "PROC", "PROCEDURE", "PUBLIC", "PURGE", "RAISE",
    "RAISERROR", "RANGE", "READ", "READS", "READTEXT", "REAL", "RECONFIGURE", "RECURSIVE",
    "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPEAT", "REPLACE", "REPLICATION",
    "REQUIRE", "RESTORE", "RESTRICT", "RETURN", "RETURNING", "REVERT", "REVOKE", "RIGHT", "RLIKE",
    "ROLLBACK", "ROW", "ROWCOUNT", "ROWGUIDCOL", "ROWS", "RULE", "SAVE", "SAVEPOINT", "SCHEMA",
    "SCHEMAS", "SELECT", "SENSITIVE", "SEPARATOR", "SESSION_USER", "SET", "SETUSER", "SHOW",
    "SHUTDOWN", "SIMILAR", "SMALLINT", "SOME", "SPATIAL", "SPECIFIC", "SQL", "STARTING",
    "STATISTICS", "STRAIGHT_JOIN", "SYMMETRIC", "SYSTEM_USER", "TABLE", "TABLESAMPLE",
    "TEMPORARY", "TERMINATED", "TEXTSIZE", "THEN", "TO", "TOP", "TRAILING", "TRAN",
    "TRANSACTION", "TRIGGER", "TRUE", "TRUNCATE", "UNDO", "UNION", "UNIQUE", "UNLOCK", "UNPIVOT",
    "UNSIGNED", "UPDATE", "UPDATETEXT", "USAGE", "USE", "USING", "VACUUM", "VALUES", "VARCHAR",
    "VARYING", "VERBOSE", "VIEW", "VIRTUAL", "WAITFOR", "WHEN", "WHERE", "WHILE", "WINDOW",
    "WITH", "WITHOUT", "WRITE", "WRITETEXT", "XOR", "ZEROFILL",
];

pub fn is_reserved(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    RESERVED_WORDS.binary_search(&upper.as_str()).is_ok()
}

/// Validate a table, view or column name before it is written into DDL.
pub fn check_identifier(kind: &str, name: &str) -> OrmResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(OrmError::schema(format!("invalid {kind} name '{name}'")));
    }
    if is_reserved(name) {
        return Err(OrmError::schema(format!(
            "{kind} name '{name}' is a reserved SQL word"
        )));
    }
    Ok(())
}
