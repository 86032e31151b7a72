use super::types::QueryResult;
use crate::quote::quote;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogEntry {
    /// Statement text with bound values substituted. For display only.
    pub sql: String,
    pub elapsed: Duration,
    pub result: QueryResult,
}

/// Bounded, per-connection history of executed statements.
#[derive(Debug)]
pub struct QueryLog {
    entries: Mutex<VecDeque<QueryLogEntry>>,
    capacity: usize,
}

impl QueryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn record(&self, entry: QueryLogEntry) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Snapshot of the log, oldest first.
    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<QueryLogEntry> {
        self.entries.lock().ok().and_then(|e| e.back().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total time spent in logged statements.
    pub fn total_elapsed(&self) -> Duration {
        self.entries
            .lock()
            .map(|e| e.iter().map(|entry| entry.elapsed).sum())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Substitute quoted values for `:pN` placeholders.
///
/// Placeholders inside quoted literals are not touched, and `:p1` never
/// matches the prefix of `:p10`.
pub fn interpolate(sql: &str, params: &[(String, Value)]) -> String {
    if params.is_empty() {
        return sql.to_string();
    }
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + params.len() * 4);
    let mut quote_char: Option<u8> = None;
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote_char {
            Some(q) if b == q => quote_char = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote_char = Some(b),
            None if b == b':'
                && bytes.get(i + 1) == Some(&b'p')
                && bytes.get(i + 2).is_some_and(u8::is_ascii_digit)
                && (i == 0 || bytes[i - 1] != b':') =>
            {
                let mut end = i + 2;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let name = &sql[i..end];
                if let Some((_, value)) = params.iter().find(|(n, _)| n == name) {
                    out.push_str(&sql[last..i]);
                    out.push_str(&quote(value));
                    last = end;
                }
                i = end;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    out.push_str(&sql[last..]);
    out
}
