//! Expression tree for WHERE clauses.
//!
//! Conditions are kept as nodes and rendered on demand, so placeholder
//! numbering (`:p0`, `:p1`, ...) always follows render order no matter in
//! which order the conditions were added.

use crate::value::Value;
use std::fmt;

/// Comparison operator for [`Expr::Compare`] and [`Query::filter_op`](super::Query::filter_op).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }

    /// The operator a bare `filter(key, value)` picks for `value`.
    ///
    /// `Null` is `IS NULL`, a list is `IN`, text containing `%` is `LIKE`,
    /// anything else is `=`.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Op::IsNull,
            Value::List(_) => Op::In,
            Value::Text(s) if s.contains('%') => Op::Like,
            _ => Op::Eq,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How the top-level fragments of a WHERE clause are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

/// Collects bound values while an expression renders.
#[derive(Debug, Clone, Default)]
pub struct ParamList {
    params: Vec<(String, Value)>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder.
    pub fn push(&mut self, value: Value) -> String {
        let name = format!(":p{}", self.params.len());
        self.params.push((name.clone(), value));
        name
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, Value)> {
        self.params
    }
}

/// A WHERE-clause node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// `column op :pN`
    Compare {
        column: String,
        op: Op,
        value: Value,
    },
    NullCheck {
        column: String,
        is_null: bool,
    },
    InList {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// SQL with `?` placeholders bound to `params` in order.
    Template {
        sql: String,
        params: Vec<Value>,
    },
    /// Literal SQL, emitted as written.
    Raw(String),
    True,
    False,
}

impl Expr {
    /// Build a condition for `column op value`, normalising the value to fit
    /// the operator: a scalar `IN` becomes a one-element list, `= NULL` becomes
    /// `IS NULL`.
    pub fn compare(column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match op {
            Op::IsNull => Expr::is_null(column),
            Op::IsNotNull => Expr::is_not_null(column),
            Op::In | Op::NotIn => {
                let values = match value {
                    Value::List(values) => values,
                    other => vec![other],
                };
                Expr::in_values(column, values, op == Op::NotIn)
            }
            Op::Eq if value.is_null() => Expr::is_null(column),
            Op::Ne if value.is_null() => Expr::is_not_null(column),
            op => Expr::Compare { column, op, value },
        }
    }

    /// `column <inferred op> value`, see [`Op::infer`].
    pub fn infer(column: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let op = Op::infer(&value);
        Expr::compare(column, op, value)
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::compare(column, Op::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::compare(column, Op::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::compare(column, Op::Gt, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::compare(column, Op::Lt, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Expr::NullCheck {
            column: column.into(),
            is_null: true,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Expr::NullCheck {
            column: column.into(),
            is_null: false,
        }
    }

    /// `column IN (...)`; an empty list never matches.
    pub fn in_list<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Expr::in_values(column, values.into_iter().map(Into::into).collect(), false)
    }

    /// `column NOT IN (...)`; an empty list always matches.
    pub fn not_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Expr::in_values(column, values.into_iter().map(Into::into).collect(), true)
    }

    fn in_values(column: impl Into<String>, values: Vec<Value>, negated: bool) -> Self {
        if values.is_empty() {
            return if negated { Expr::True } else { Expr::False };
        }
        Expr::InList {
            column: column.into(),
            values,
            negated,
        }
    }

    /// SQL fragment with `?` placeholders.
    ///
    /// ```ignore
    /// Expr::template("price BETWEEN ? AND ?", [10, 20])
    /// ```
    pub fn template<V: Into<Value>>(sql: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Expr::Template {
            sql: sql.into(),
            params: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// True when rendering produces no SQL.
    pub fn is_empty(&self) -> bool {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().all(Expr::is_empty),
            Expr::Not(inner) => inner.is_empty(),
            Expr::Raw(sql) => sql.trim().is_empty(),
            _ => false,
        }
    }

    /// Column this condition tests, if it is a plain column condition.
    pub fn column(&self) -> Option<&str> {
        match self {
            Expr::Compare { column, .. }
            | Expr::NullCheck { column, .. }
            | Expr::InList { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Copy with every `from.`-prefixed column rewritten to `to.`.
    ///
    /// Raw and template SQL is left alone.
    pub fn requalify(&self, from: &str, to: &str) -> Expr {
        let rename = |column: &String| match column.split_once('.') {
            Some((table, field)) if table == from => format!("{to}.{field}"),
            _ => column.clone(),
        };
        match self {
            Expr::And(exprs) => Expr::And(exprs.iter().map(|e| e.requalify(from, to)).collect()),
            Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| e.requalify(from, to)).collect()),
            Expr::Not(inner) => Expr::Not(Box::new(inner.requalify(from, to))),
            Expr::Compare { column, op, value } => Expr::Compare {
                column: rename(column),
                op: *op,
                value: value.clone(),
            },
            Expr::NullCheck { column, is_null } => Expr::NullCheck {
                column: rename(column),
                is_null: *is_null,
            },
            Expr::InList {
                column,
                values,
                negated,
            } => Expr::InList {
                column: rename(column),
                values: values.clone(),
                negated: *negated,
            },
            other => other.clone(),
        }
    }

    /// Whether the rendered form needs parentheses when embedded in a larger
    /// conjunction.
    fn is_compound(&self) -> bool {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().filter(|e| !e.is_empty()).count() > 1,
            Expr::Raw(_) | Expr::Template { .. } => true,
            _ => false,
        }
    }

    /// Render with `:pN` placeholders, binding values into `params`.
    pub fn render(&self, params: &mut ParamList) -> String {
        match self {
            Expr::And(exprs) => render_group(exprs, Conjunction::And, params),
            Expr::Or(exprs) => render_group(exprs, Conjunction::Or, params),
            Expr::Not(inner) => {
                let sql = inner.render(params);
                if sql.is_empty() {
                    sql
                } else {
                    format!("NOT ({sql})")
                }
            }
            Expr::Compare { column, op, value } => {
                let placeholder = params.push(value.clone());
                format!("{column} {op} {placeholder}")
            }
            Expr::NullCheck { column, is_null } => {
                if *is_null {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                }
            }
            Expr::InList {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1=1".into() } else { "1=0".into() };
                }
                let placeholders: Vec<String> =
                    values.iter().map(|v| params.push(v.clone())).collect();
                let op = if *negated { Op::NotIn } else { Op::In };
                format!("{column} {op} ({})", placeholders.join(", "))
            }
            Expr::Template {
                sql,
                params: values,
            } => {
                let mut out = String::with_capacity(sql.len());
                let mut values = values.iter();
                for ch in sql.chars() {
                    if ch == '?' {
                        if let Some(v) = values.next() {
                            out.push_str(&params.push(v.clone()));
                            continue;
                        }
                    }
                    out.push(ch);
                }
                out
            }
            Expr::Raw(sql) => sql.trim().to_string(),
            Expr::True => "1=1".into(),
            Expr::False => "1=0".into(),
        }
    }
}

/// Render `exprs` joined by `conjunction`, parenthesising compound members.
pub(crate) fn render_group(exprs: &[Expr], conjunction: Conjunction, params: &mut ParamList) -> String {
    let members: Vec<&Expr> = exprs.iter().filter(|e| !e.is_empty()).collect();
    let wrap = members.len() > 1;
    members
        .into_iter()
        .map(|e| {
            let sql = e.render(params);
            if wrap && e.is_compound() {
                format!("({sql})")
            } else {
                sql
            }
        })
        .collect::<Vec<_>>()
        .join(conjunction.as_sql())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(expr: &Expr) -> (String, Vec<(String, Value)>) {
        let mut params = ParamList::new();
        let sql = expr.render(&mut params);
        (sql, params.into_vec())
    }

    #[test]
    fn inference_follows_value_shape() {
        assert_eq!(render(&Expr::infer("a", Value::Null)).0, "a IS NULL");
        assert_eq!(render(&Expr::infer("a", vec![1, 2])).0, "a IN (:p0, :p1)");
        assert_eq!(render(&Expr::infer("a", "jo%")).0, "a LIKE :p0");
        assert_eq!(render(&Expr::infer("a", "jo")).0, "a = :p0");
        assert_eq!(render(&Expr::infer("a", 5)).0, "a = :p0");
    }

    #[test]
    fn nested_groups_are_parenthesised() {
        let expr = Expr::And(vec![
            Expr::eq("status", "active"),
            Expr::Or(vec![Expr::eq("role", "admin"), Expr::eq("role", "root")]),
        ]);
        let (sql, params) = render(&expr);
        assert_eq!(sql, "status = :p0 AND (role = :p1 OR role = :p2)");
        assert_eq!(params[2], (":p2".to_string(), Value::Text("root".into())));
    }

    #[test]
    fn empty_in_lists() {
        assert_eq!(render(&Expr::in_list("id", Vec::<i64>::new())).0, "1=0");
        assert_eq!(render(&Expr::not_in("id", Vec::<i64>::new())).0, "1=1");
    }

    #[test]
    fn scalar_in_becomes_single_element_list() {
        let (sql, params) = render(&Expr::compare("id", Op::In, 3));
        assert_eq!(sql, "id IN (:p0)");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn eq_null_is_null_check() {
        assert_eq!(render(&Expr::eq("a", Value::Null)).0, "a IS NULL");
        assert_eq!(render(&Expr::ne("a", Value::Null)).0, "a IS NOT NULL");
    }

    #[test]
    fn template_binds_in_order() {
        let (sql, params) = render(&Expr::template("price BETWEEN ? AND ?", [10, 20]));
        assert_eq!(sql, "price BETWEEN :p0 AND :p1");
        assert_eq!(params[1].1, Value::Int(20));
    }

    #[test]
    fn not_wraps_inner() {
        assert_eq!(render(&Expr::not(Expr::eq("banned", true))).0, "NOT (banned = :p0)");
    }
}
