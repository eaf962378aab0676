// src/query.rs

//! Search over the package store
//!
//! A [`SearchRequest`] compiles into one `SELECT` against `packages`.
//! Filters are ANDed; link and attribute-bag filters become `EXISTS`
//! subqueries so a package matching several links is listed once.
//!
//! Search terms are literal, case-insensitive substrings unless prefixed
//! with `re:`, in which case the rest is a case-insensitive regular
//! expression.

use crate::db::models::{LinkType, Source};
use crate::db::{PackageDb, escape_like};
use crate::error::{Error, Result};
use regex::RegexBuilder;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::fmt;
use tracing::debug;

/// Prefix marking a search term as a regular expression
pub const REGEX_PREFIX: &str = "re:";

/// Default page size, matching what an interactive list shows
pub const DEFAULT_LIMIT: usize = 1000;

/// How a term is matched against a text column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Case-insensitive substring
    Contains(String),
    /// Case-insensitive regular expression
    Regex(String),
}

impl Matcher {
    /// Classify `term`; a `re:` pattern must compile
    pub fn parse(term: &str) -> Result<Self> {
        match term.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Matcher::Regex(pattern.to_string()))
            }
            None => Ok(Matcher::Contains(term.to_string())),
        }
    }

    fn sql(&self, column: &str, params: &mut Vec<Value>) -> String {
        match self {
            Matcher::Contains(text) => {
                params.push(Value::Text(format!("%{}%", escape_like(text))));
                format!("{} LIKE ? ESCAPE '\\'", column)
            }
            Matcher::Regex(pattern) => {
                params.push(Value::Text(pattern.clone()));
                format!("{} REGEXP ?", column)
            }
        }
    }
}

/// One structured search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// No maintainer
    Abandoned,
    /// Flagged out of date
    OutOfDate,
    /// A link of this type whose target starts with the prefix
    Link(LinkType, String),
    Maintainer(String),
    /// Stored under one of these sources
    Repos(Vec<String>),
    /// Listed as co-maintainer (exact, case-insensitive)
    CoMaintainer(String),
    /// A license containing this text
    License(String),
}

impl Filter {
    /// Parse a `key[=value]` filter argument.
    ///
    /// Keys: `abandoned`, `out_of_date`, `maintainer`, `repos` (or `source`,
    /// comma separated), `depends`, `makedepends`, `checkdepends`,
    /// `optdepends`, `provides`, `comaintainers`, `license`.
    pub fn parse(arg: &str) -> Result<Self> {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (arg.trim(), None),
        };
        let key = key.to_ascii_lowercase().replace('-', "_");

        let required = |value: Option<&str>| -> Result<String> {
            match value {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(Error::ParseError(format!("filter '{}' needs a value", key))),
            }
        };

        let filter = match key.as_str() {
            "abandoned" => Filter::Abandoned,
            "out_of_date" | "outofdate" => Filter::OutOfDate,
            "maintainer" => Filter::Maintainer(required(value)?),
            "repos" | "repo" | "source" => Filter::Repos(
                required(value)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            "comaintainers" | "comaintainer" | "co_maintainers" => {
                Filter::CoMaintainer(required(value)?)
            }
            "license" => Filter::License(required(value)?),
            other => match other.parse::<LinkType>() {
                Ok(link_type) if link_type.is_dependency() || link_type == LinkType::Provides => {
                    Filter::Link(link_type, required(value)?)
                }
                _ => return Err(Error::ParseError(format!("unknown filter '{}'", other))),
            },
        };
        Ok(filter)
    }

    fn sql(&self, params: &mut Vec<Value>) -> Result<String> {
        let clause = match self {
            Filter::Abandoned => "(p.maintainer IS NULL OR p.maintainer = '')".to_string(),
            Filter::OutOfDate => "p.out_of_date IS NOT NULL".to_string(),
            Filter::Link(link_type, prefix) => {
                params.push(Value::Text(link_type.as_str().to_string()));
                params.push(Value::Text(format!("{}%", escape_like(prefix))));
                "EXISTS (SELECT 1 FROM links l WHERE l.name = p.name AND l.source = p.source \
                 AND l.link_type = ? AND l.target LIKE ? ESCAPE '\\')"
                    .to_string()
            }
            Filter::Maintainer(term) => Matcher::parse(term)?.sql("p.maintainer", params),
            Filter::Repos(repos) => {
                if repos.is_empty() {
                    return Ok("0".to_string());
                }
                let placeholders = vec!["?"; repos.len()].join(", ");
                params.extend(repos.iter().map(|r| Value::Text(r.clone())));
                format!("p.source IN ({})", placeholders)
            }
            Filter::CoMaintainer(name) => {
                params.push(Value::Text(name.clone()));
                "EXISTS (SELECT 1 FROM json_each(p.metadata, '$.co_maintainers') \
                 WHERE value = ? COLLATE NOCASE)"
                    .to_string()
            }
            Filter::License(text) => {
                params.push(Value::Text(format!("%{}%", escape_like(text))));
                "EXISTS (SELECT 1 FROM json_each(p.metadata, '$.licenses') \
                 WHERE value LIKE ? ESCAPE '\\')"
                    .to_string()
            }
        };
        Ok(clause)
    }
}

/// Allowed sort columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Name,
    #[default]
    Popularity,
    Votes,
    LastModified,
    FirstSubmitted,
}

impl SortKey {
    /// Parse a sort key; anything unrecognized sorts by popularity
    pub fn parse(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "name" => SortKey::Name,
            "popularity" => SortKey::Popularity,
            "votes" | "num_votes" => SortKey::Votes,
            "last_modified" | "modified" => SortKey::LastModified,
            "first_submitted" | "submitted" => SortKey::FirstSubmitted,
            other => {
                debug!("Unknown sort key '{}', sorting by popularity", other);
                SortKey::Popularity
            }
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortKey::Name => "p.name",
            SortKey::Popularity => "COALESCE(p.popularity, 0.0)",
            SortKey::Votes => "COALESCE(p.num_votes, 0)",
            SortKey::LastModified => "COALESCE(p.last_modified, 0)",
            SortKey::FirstSubmitted => "COALESCE(p.first_submitted, 0)",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Name => "name",
            SortKey::Popularity => "popularity",
            SortKey::Votes => "votes",
            SortKey::LastModified => "last_modified",
            SortKey::FirstSubmitted => "first_submitted",
        };
        write!(f, "{}", name)
    }
}

/// Page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(usize),
    Unbounded,
}

impl Limit {
    /// CLI convention: a negative count means no limit
    pub fn from_arg(value: i64) -> Self {
        if value < 0 {
            Limit::Unbounded
        } else {
            Limit::Count(value as usize)
        }
    }

    fn sql_value(&self) -> i64 {
        match self {
            Limit::Count(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            Limit::Unbounded => -1,
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Limit::Count(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub term: String,
    pub filters: Vec<Filter>,
    pub sort: SortKey,
    /// Highest first when set
    pub descending: bool,
    pub limit: Limit,
    pub offset: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            term: String::new(),
            filters: Vec::new(),
            sort: SortKey::default(),
            descending: true,
            limit: Limit::default(),
            offset: 0,
        }
    }
}

impl SearchRequest {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: SortKey, descending: bool) -> Self {
        self.sort = sort;
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: Limit) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Build the SQL text and its parameters
    fn compile(&self) -> Result<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut clauses = Vec::new();

        if !self.term.is_empty() {
            clauses.push(Matcher::parse(&self.term)?.sql("p.name", &mut params));
        }
        for filter in &self.filters {
            clauses.push(filter.sql(&mut params)?);
        }

        let mut sql = String::from(
            "SELECT p.source, p.name, COALESCE(p.version, ''), COALESCE(p.popularity, 0.0), \
             COALESCE(p.num_votes, 0), p.pkg_id FROM packages p",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let direction = if self.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY {} {}, p.name ASC, p.source ASC LIMIT ? OFFSET ?",
            self.sort.column(),
            direction
        ));
        params.push(Value::Integer(self.limit.sql_value()));
        params.push(Value::Integer(i64::try_from(self.offset).unwrap_or(i64::MAX)));

        Ok((sql, params))
    }
}

/// Summary row of a search hit; full records come from `package_info`
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub source: Source,
    pub name: String,
    pub version: String,
    pub popularity: f64,
    pub num_votes: i64,
    pub pkg_id: Option<i64>,
}

/// Run a search
pub fn search(db: &PackageDb, request: &SearchRequest) -> Result<Vec<SearchResult>> {
    let (sql, params) = request.compile()?;
    debug!("search: {}", sql);

    db.with_connection("search", |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let source: String = row.get(0)?;
                Ok(SearchResult {
                    source: Source::from(source.as_str()),
                    name: row.get(1)?,
                    version: row.get(2)?,
                    popularity: row.get(3)?,
                    num_votes: row.get(4)?,
                    pkg_id: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
