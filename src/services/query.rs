//! List query for the users resource: search, filters, sort and pagination.
//!
//! Parsed once at the HTTP boundary from either the query string
//! (`GET /api/users`) or a search body (`POST /api/users/search`), then
//! handed to a `UserStore`, which turns it into SQL or evaluates it in memory.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserView;
use crate::utils::date;

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("'{field}' is not a {kind} field")]
    UnknownField {
        parameter: String,
        field: String,
        kind: &'static str,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        parameter: String,
        field: String,
        reason: String,
    },

    #[error("unsupported operator '{operator}'")]
    UnknownOperator { parameter: String, operator: String },

    #[error("{parameter} {reason}")]
    InvalidParameter { parameter: String, reason: String },
}

impl QueryError {
    /// Request parameter the error is reported under.
    pub fn parameter(&self) -> &str {
        match self {
            QueryError::UnknownField { parameter, .. }
            | QueryError::InvalidValue { parameter, .. }
            | QueryError::UnknownOperator { parameter, .. }
            | QueryError::InvalidParameter { parameter, .. } => parameter,
        }
    }
}

/// Columns exposed for filtering and sorting. The password hash is never one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserField {
    Id,
    Name,
    Email,
    CreatedAt,
    UpdatedAt,
}

impl UserField {
    pub const ALL: [UserField; 5] = [
        UserField::Id,
        UserField::Name,
        UserField::Email,
        UserField::CreatedAt,
        UserField::UpdatedAt,
    ];

    /// Also the SQL column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Name => "name",
            UserField::Email => "email",
            UserField::CreatedAt => "created_at",
            UserField::UpdatedAt => "updated_at",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, UserField::Name | UserField::Email)
    }

    pub fn parse_value(&self, raw: &str) -> Result<FieldValue, String> {
        match self {
            UserField::Id => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| format!("'{}' is not an integer", raw)),
            UserField::Name | UserField::Email => Ok(FieldValue::Text(raw.to_string())),
            UserField::CreatedAt | UserField::UpdatedAt => date::parse(raw.trim()).map(FieldValue::Time),
        }
    }

    pub fn value_of(&self, user: &UserView) -> FieldValue {
        match self {
            UserField::Id => FieldValue::Int(user.id),
            UserField::Name => FieldValue::Text(user.name.clone()),
            UserField::Email => FieldValue::Text(user.email.clone()),
            UserField::CreatedAt => FieldValue::Time(user.created_at),
            UserField::UpdatedAt => FieldValue::Time(user.updated_at),
        }
    }
}

/// A typed filter operand. Values of one field always share a variant.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
}

impl FilterOp {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Some(FilterOp::Eq),
            "!=" | "<>" => Some(FilterOp::NotEq),
            "<" => Some(FilterOp::Lt),
            "<=" => Some(FilterOp::Lte),
            ">" => Some(FilterOp::Gt),
            ">=" => Some(FilterOp::Gte),
            "like" => Some(FilterOp::Like),
            "not like" => Some(FilterOp::NotLike),
            "in" => Some(FilterOp::In),
            "not in" => Some(FilterOp::NotIn),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "<>",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Like => "LIKE",
            FilterOp::NotLike => "NOT LIKE",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, FilterOp::Like | FilterOp::NotLike)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: UserField,
    pub op: FilterOp,
    /// Exactly one value unless `op` is a list operator.
    pub values: Vec<FieldValue>,
}

impl Filter {
    fn parse(parameter: &str, field: &str, op: FilterOp, raw: &[String]) -> Result<Self, QueryError> {
        let field = UserField::from_str(field).ok_or_else(|| QueryError::UnknownField {
            parameter: parameter.to_string(),
            field: field.to_string(),
            kind: "filterable",
        })?;
        if op.is_pattern() && !field.is_text() {
            return Err(QueryError::InvalidValue {
                parameter: parameter.to_string(),
                field: field.as_str().to_string(),
                reason: "pattern operators only apply to text fields".to_string(),
            });
        }
        if !op.is_list() && raw.len() != 1 {
            return Err(QueryError::InvalidValue {
                parameter: parameter.to_string(),
                field: field.as_str().to_string(),
                reason: "expected a single value".to_string(),
            });
        }
        let values = raw
            .iter()
            .map(|v| field.parse_value(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| QueryError::InvalidValue {
                parameter: parameter.to_string(),
                field: field.as_str().to_string(),
                reason,
            })?;
        Ok(Self { field, op, values })
    }

    pub fn matches(&self, user: &UserView) -> bool {
        let actual = self.field.value_of(user);
        let first = self.values.first();
        match self.op {
            FilterOp::Eq => first == Some(&actual),
            FilterOp::NotEq => first != Some(&actual),
            FilterOp::Lt => first.is_some_and(|v| actual < *v),
            FilterOp::Lte => first.is_some_and(|v| actual <= *v),
            FilterOp::Gt => first.is_some_and(|v| actual > *v),
            FilterOp::Gte => first.is_some_and(|v| actual >= *v),
            FilterOp::Like | FilterOp::NotLike => {
                let hit = match (first, &actual) {
                    (Some(FieldValue::Text(pattern)), FieldValue::Text(text)) => like_match(pattern, text),
                    _ => false,
                };
                hit == (self.op == FilterOp::Like)
            }
            FilterOp::In => self.values.contains(&actual),
            FilterOp::NotIn => !self.values.contains(&actual),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: UserField,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    /// Case-insensitive substring matched against name and email.
    pub search: Option<String>,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            filters: Vec::new(),
            sort: Vec::new(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ListQuery {
    /// `?search=ann&filter[email]=ann@x.com&sort=-created_at,name&page=2&limit=20`
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mut query = Self::default();
        query.apply_paging(params)?;

        query.search = params
            .get("search")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut filter_keys: Vec<&String> = params.keys().filter(|k| k.starts_with("filter[")).collect();
        filter_keys.sort();
        for key in filter_keys {
            let field = key
                .strip_prefix("filter[")
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| QueryError::InvalidParameter {
                    parameter: key.clone(),
                    reason: "must look like filter[<field>]".to_string(),
                })?;
            let value = params.get(key).cloned().unwrap_or_default();
            query
                .filters
                .push(Filter::parse(key, field, FilterOp::Eq, &[value])?);
        }

        if let Some(sort) = params.get("sort") {
            for part in sort.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (name, descending) = match part.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (part, false),
                };
                query.sort.push(SortKey {
                    field: sortable_field("sort", name)?,
                    descending,
                });
            }
        }

        Ok(query)
    }

    /// Search body plus `page`/`limit` from the query string.
    pub fn from_search(body: SearchRequest, params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mut query = Self::default();
        query.apply_paging(params)?;

        query.search = body
            .search
            .map(|s| s.value.trim().to_string())
            .filter(|s| !s.is_empty());

        for (index, spec) in body.filters.into_iter().enumerate() {
            let parameter = format!("filters.{}", index);
            let op = FilterOp::from_str(&spec.operator).ok_or_else(|| QueryError::UnknownOperator {
                parameter: parameter.clone(),
                operator: spec.operator.clone(),
            })?;
            let raw = json_operands(&parameter, &spec.field, spec.value, op.is_list())?;
            query.filters.push(Filter::parse(&parameter, &spec.field, op, &raw)?);
        }

        for (index, spec) in body.sort.into_iter().enumerate() {
            let parameter = format!("sort.{}", index);
            let descending = match spec.direction.as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    return Err(QueryError::InvalidParameter {
                        parameter,
                        reason: format!("direction must be 'asc' or 'desc', got '{}'", other),
                    })
                }
            };
            query.sort.push(SortKey {
                field: sortable_field(&parameter, &spec.field)?,
                descending,
            });
        }

        Ok(query)
    }

    fn apply_paging(&mut self, params: &HashMap<String, String>) -> Result<(), QueryError> {
        if let Some(page) = params.get("page") {
            self.page = parse_positive("page", page, u32::MAX)?;
        }
        if let Some(limit) = params.get("limit") {
            self.per_page = parse_positive("limit", limit, MAX_PER_PAGE)?;
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn matches(&self, user: &UserView) -> bool {
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            if !user.name.to_lowercase().contains(&term) && !user.email.to_lowercase().contains(&term) {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(user))
    }

    /// Requested sort keys, then id ascending as the tiebreaker.
    pub fn compare(&self, a: &UserView, b: &UserView) -> Ordering {
        for key in &self.sort {
            let ordering = key
                .field
                .value_of(a)
                .partial_cmp(&key.field.value_of(b))
                .unwrap_or(Ordering::Equal);
            let ordering = if key.descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

fn sortable_field(parameter: &str, name: &str) -> Result<UserField, QueryError> {
    UserField::from_str(name.trim()).ok_or_else(|| QueryError::UnknownField {
        parameter: parameter.to_string(),
        field: name.to_string(),
        kind: "sortable",
    })
}

fn parse_positive(parameter: &str, raw: &str, max: u32) -> Result<u32, QueryError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 && n <= max => Ok(n),
        _ => Err(QueryError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: format!("must be an integer between 1 and {}", max),
        }),
    }
}

fn json_operands(
    parameter: &str,
    field: &str,
    value: serde_json::Value,
    list: bool,
) -> Result<Vec<String>, QueryError> {
    let invalid = |reason: &str| QueryError::InvalidValue {
        parameter: parameter.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    };
    let scalar = |v: serde_json::Value| match v {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(invalid("expected a string or number")),
    };
    match (value, list) {
        (serde_json::Value::Array(items), true) => items.into_iter().map(scalar).collect(),
        (_, true) => Err(invalid("expected an array")),
        (serde_json::Value::Array(_), false) => Err(invalid("expected a single value")),
        (v, false) => Ok(vec![scalar(v)?]),
    }
}

/// SQL `LIKE` semantics: `%` matches any run, `_` one character, case-sensitive.
pub fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) && pattern[p] != '%' {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub search: Option<SearchTerm>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTerm {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    pub value: serde_json::Value,
}

fn default_operator() -> String {
    "=".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Paginated listing in the shape `{data, meta}`.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub from: Option<u64>,
    pub last_page: u64,
    pub per_page: u32,
    pub to: Option<u64>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, query: &ListQuery) -> Self {
        let per_page = u64::from(query.per_page);
        let offset = query.offset();
        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + data.len() as u64))
        };
        Self {
            meta: PageMeta {
                current_page: query.page,
                from,
                last_page: total.div_ceil(per_page).max(1),
                per_page: query.per_page,
                to,
                total,
            },
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn user(id: i64, name: &str, email: &str) -> UserView {
        let created = date::parse("2024-01-01").unwrap() + chrono::Duration::days(id);
        UserView {
            id,
            name: name.to_string(),
            email: email.to_string(),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn defaults_to_first_page_of_fifteen() {
        let query = ListQuery::from_params(&HashMap::new()).unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, DEFAULT_PER_PAGE);
        assert_eq!(query.offset(), 0);
        assert!(query.search.is_none());
    }

    #[test]
    fn parses_query_string() {
        let query = ListQuery::from_params(&params(&[
            ("search", " ann "),
            ("filter[id]", "7"),
            ("sort", "-created_at,name"),
            ("page", "3"),
            ("limit", "10"),
        ]))
        .unwrap();

        assert_eq!(query.search.as_deref(), Some("ann"));
        assert_eq!(
            query.filters,
            vec![Filter {
                field: UserField::Id,
                op: FilterOp::Eq,
                values: vec![FieldValue::Int(7)],
            }]
        );
        assert_eq!(
            query.sort,
            vec![
                SortKey { field: UserField::CreatedAt, descending: true },
                SortKey { field: UserField::Name, descending: false },
            ]
        );
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn rejects_unknown_and_malformed_parameters() {
        let err = ListQuery::from_params(&params(&[("sort", "password")])).unwrap_err();
        assert_eq!(err.parameter(), "sort");

        let err = ListQuery::from_params(&params(&[("filter[password]", "x")])).unwrap_err();
        assert_eq!(err.parameter(), "filter[password]");

        assert!(ListQuery::from_params(&params(&[("filter[id]", "seven")])).is_err());
        assert!(ListQuery::from_params(&params(&[("page", "0")])).is_err());
        assert!(ListQuery::from_params(&params(&[("limit", "500")])).is_err());
    }

    #[test]
    fn parses_search_body() {
        let body: SearchRequest = serde_json::from_value(json!({
            "search": {"value": "x.com"},
            "filters": [
                {"field": "id", "operator": "in", "value": [1, 2, 3]},
                {"field": "name", "operator": "like", "value": "A%"},
                {"field": "created_at", "operator": ">=", "value": "2024-01-02"}
            ],
            "sort": [{"field": "email", "direction": "desc"}]
        }))
        .unwrap();

        let query = ListQuery::from_search(body, &params(&[("limit", "5")])).unwrap();
        assert_eq!(query.search.as_deref(), Some("x.com"));
        assert_eq!(query.filters.len(), 3);
        assert_eq!(query.filters[0].values.len(), 3);
        assert_eq!(query.filters[1].op, FilterOp::Like);
        assert_eq!(query.sort, vec![SortKey { field: UserField::Email, descending: true }]);
        assert_eq!(query.per_page, 5);
    }

    #[test]
    fn search_body_rejects_bad_operators() {
        let body: SearchRequest = serde_json::from_value(json!({
            "filters": [{"field": "id", "operator": "~", "value": 1}]
        }))
        .unwrap();
        let err = ListQuery::from_search(body, &HashMap::new()).unwrap_err();
        assert_eq!(err.parameter(), "filters.0");

        let body: SearchRequest = serde_json::from_value(json!({
            "filters": [{"field": "id", "operator": "like", "value": "1%"}]
        }))
        .unwrap();
        assert!(ListQuery::from_search(body, &HashMap::new()).is_err());
    }

    #[test]
    fn evaluates_filters_and_search_in_memory() {
        let ann = user(1, "Ann", "ann@x.com");
        let bob = user(2, "Bob", "bob@y.org");

        let query = ListQuery::from_params(&params(&[("search", "X.COM")])).unwrap();
        assert!(query.matches(&ann));
        assert!(!query.matches(&bob));

        let body: SearchRequest = serde_json::from_value(json!({
            "filters": [{"field": "id", "operator": ">", "value": 1}]
        }))
        .unwrap();
        let query = ListQuery::from_search(body, &HashMap::new()).unwrap();
        assert!(!query.matches(&ann));
        assert!(query.matches(&bob));
    }

    #[test]
    fn sorts_with_id_tiebreak() {
        let mut users = vec![user(3, "Ann", "c@x.com"), user(1, "Bob", "a@x.com"), user(2, "Ann", "b@x.com")];
        let query = ListQuery::from_params(&params(&[("sort", "name")])).unwrap();
        users.sort_by(|a, b| query.compare(a, b));
        let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("A%", "Ann"));
        assert!(like_match("%@x.com", "ann@x.com"));
        assert!(like_match("_nn", "Ann"));
        assert!(like_match("%", ""));
        assert!(!like_match("a%", "Ann"));
        assert!(!like_match("_n", "Ann"));
        assert!(like_match("%n%n%", "Ann"));
    }

    #[test]
    fn page_meta() {
        let query = ListQuery {
            page: 2,
            per_page: 15,
            ..Default::default()
        };
        let page = Page::new(vec![1, 2, 3], 18, &query);
        assert_eq!(
            page.meta,
            PageMeta {
                current_page: 2,
                from: Some(16),
                last_page: 2,
                per_page: 15,
                to: Some(18),
                total: 18,
            }
        );

        let empty: Page<i32> = Page::new(vec![], 0, &ListQuery::default());
        assert_eq!(empty.meta.last_page, 1);
        assert_eq!(empty.meta.from, None);
    }
}
