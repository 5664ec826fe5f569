//! Core identities shared by every stage of the pipeline.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::router::RouteError;

/// A business vertical with its own tables and enum codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Finance,
    Healthcare,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Finance => "FINANCE",
            Domain::Healthcare => "HEALTHCARE",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Domain {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FINANCE" => Ok(Domain::Finance),
            "HEALTHCARE" => Ok(Domain::Healthcare),
            _ => Err(RouteError::UnknownDomain(s.trim().to_string())),
        }
    }
}

/// Query-language variant of a backend.
///
/// `Postgres` and `MySql` are the two relational dialects; `Document` is the
/// document store reached through the constrained SQL translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Document,
}

impl Dialect {
    /// Canonical upper-case token used in backend identities.
    pub fn token(&self) -> &'static str {
        match self {
            Dialect::Postgres => "PGSQL",
            Dialect::MySql => "MYSQL",
            Dialect::Document => "MONGODB",
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(self, Dialect::Document)
    }

    /// Fold a user supplied dialect hint onto a dialect, accepting the usual
    /// synonyms (`pg`, `postgres`, `postgresql` ...).
    pub fn parse(hint: &str) -> Result<Self, RouteError> {
        let folded = hint.trim().to_uppercase();
        match folded.as_str() {
            "PG" | "PGSQL" | "POSTGRES" | "POSTGRESQL" => Ok(Dialect::Postgres),
            "MYSQL" | "MARIADB" => Ok(Dialect::MySql),
            "MONGO" | "MONGODB" | "DOCUMENT" => Ok(Dialect::Document),
            _ => Err(RouteError::UnknownDialect(hint.trim().to_string())),
        }
    }

    /// sqlparser dialect used when a rewrite needs a real parse.
    pub fn sql_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Dialect::Postgres => Box::new(sqlparser::dialect::PostgreSqlDialect {}),
            Dialect::MySql => Box::new(sqlparser::dialect::MySqlDialect {}),
            Dialect::Document => Box::new(sqlparser::dialect::GenericDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for Dialect {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::parse(s)
    }
}

/// A resolved backend identity. Holds no connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub domain: Domain,
    pub dialect: Dialect,
}

impl ExecutionTarget {
    pub fn new(domain: Domain, dialect: Dialect) -> Self {
        Self { domain, dialect }
    }

    /// Identity string such as `FINANCE_PGSQL`.
    pub fn identity(&self) -> String {
        format!("{}_{}", self.domain.as_str(), self.dialect.token())
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// A generated statement paired with the domain it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCandidate {
    pub domain: Domain,
    pub sql: String,
}

impl SqlCandidate {
    pub fn new(domain: Domain, sql: impl Into<String>) -> Self {
        Self {
            domain,
            sql: sql.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}
