//! Dynamic SQL assembly for history queries
//!
//! Optional clauses (time range, host filter, substrings, sort, limit) are
//! collected as fragments and every value goes through a numbered positional
//! parameter, so user text never ends up inside the SQL string.

use crate::types::{Query, SortType};
use rusqlite::types::Value;

/// Ordered clause fragments plus positional parameters.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    select: String,
    joins: Vec<String>,
    conditions: Vec<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<String>,
    params: Vec<Value>,
}

impl SqlBuilder {
    /// Start from a `SELECT ... FROM ...` head
    pub fn new(select: impl Into<String>) -> Self {
        Self {
            select: select.into(),
            ..Default::default()
        }
    }

    /// Push a parameter and return its `?N` placeholder
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    pub fn join(&mut self, clause: impl Into<String>) -> &mut Self {
        self.joins.push(clause.into());
        self
    }

    /// Add a condition; all conditions are ANDed
    pub fn condition(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.into());
        self
    }

    /// `column >= from` / `column <= to` for the bounded ends of the query
    pub fn time_range(&mut self, column: &str, query: &Query) -> &mut Self {
        if query.from > 0 {
            let p = self.bind(query.from);
            self.condition(format!("{} >= {}", column, p));
        }
        if query.to > 0 {
            let p = self.bind(query.to);
            self.condition(format!("{} <= {}", column, p));
        }
        self
    }

    /// One `(a LIKE ? OR b LIKE ? ...)` group per substring.
    ///
    /// Groups are ANDed; within a group the same placeholder is reused for
    /// every column.
    pub fn substrings(&mut self, columns: &[&str], substrings: &[String]) -> &mut Self {
        for term in substrings {
            let p = self.bind(like_pattern(term));
            let alternatives: Vec<String> = columns
                .iter()
                .map(|column| format!("{} LIKE {} ESCAPE '\\'", column, p))
                .collect();
            self.condition(format!("({})", alternatives.join(" OR ")));
        }
        self
    }

    pub fn group_by(&mut self, clause: impl Into<String>) -> &mut Self {
        self.group_by = Some(clause.into());
        self
    }

    pub fn order_by(&mut self, clause: Option<String>) -> &mut Self {
        self.order_by = clause;
        self
    }

    /// `LIMIT ?`, skipped for 0
    pub fn limit(&mut self, limit: u32) -> &mut Self {
        if limit > 0 {
            let p = self.bind(limit);
            self.limit = Some(p);
        }
        self
    }

    /// Render the statement and hand back its parameters in order
    pub fn build(self) -> (String, Vec<Value>) {
        let mut sql = self.select;
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if let Some(group_by) = self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by);
        }
        if let Some(order_by) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by);
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&limit);
        }
        (sql, self.params)
    }
}

/// `%term%` with LIKE wildcards in the term escaped
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// ORDER BY for a sort type over the given count/recency expressions
pub fn order_clause(sort: SortType, count: &str, recency: &str) -> Option<String> {
    match sort {
        SortType::None => None,
        SortType::MostRecentlyVisited => Some(format!("{} DESC", recency)),
        SortType::LeastRecentlyVisited => Some(format!("{} ASC", recency)),
        SortType::MostVisited => Some(format!("{} DESC, {} DESC", count, recency)),
        SortType::LeastVisited => Some(format!("{} ASC, {} DESC", count, recency)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_numbered_in_order() {
        let query = Query::new().from_time(10).to_time(20).substring("gnome");
        let mut builder = SqlBuilder::new("SELECT urls.id FROM urls");
        builder
            .join("JOIN visits ON visits.url = urls.id")
            .time_range("visits.visit_time", &query)
            .substrings(&["urls.url", "urls.title"], &query.substrings)
            .limit(5);
        let (sql, params) = builder.build();

        assert_eq!(
            sql,
            "SELECT urls.id FROM urls JOIN visits ON visits.url = urls.id \
             WHERE visits.visit_time >= ?1 AND visits.visit_time <= ?2 \
             AND (urls.url LIKE ?3 ESCAPE '\\' OR urls.title LIKE ?3 ESCAPE '\\') LIMIT ?4"
        );
        assert_eq!(
            params,
            vec![
                Value::Integer(10),
                Value::Integer(20),
                Value::Text("%gnome%".to_string()),
                Value::Integer(5),
            ]
        );
    }

    #[test]
    fn test_unbounded_query_has_no_where() {
        let mut builder = SqlBuilder::new("SELECT hosts.id FROM hosts");
        builder.time_range("visits.visit_time", &Query::new()).limit(0);
        let (sql, params) = builder.build();
        assert_eq!(sql, "SELECT hosts.id FROM hosts");
        assert!(params.is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("100%_x\\"), "%100\\%\\_x\\\\%");
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(order_clause(SortType::None, "c", "r"), None);
        assert_eq!(
            order_clause(SortType::MostVisited, "c", "r").as_deref(),
            Some("c DESC, r DESC")
        );
        assert_eq!(
            order_clause(SortType::LeastRecentlyVisited, "c", "r").as_deref(),
            Some("r ASC")
        );
    }
}
