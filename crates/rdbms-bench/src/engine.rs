//! Supported database engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A database engine under test.
///
/// The two SQL Server variants share a driver and dialect but run as separate
/// engines so their results can be compared side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Engine {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "mssql-19")]
    MsSql2019,
    #[serde(rename = "mssql-22")]
    MsSql2022,
}

impl Engine {
    /// All engines, in report order.
    pub const ALL: [Engine; 4] = [
        Engine::MySql,
        Engine::Postgres,
        Engine::MsSql2019,
        Engine::MsSql2022,
    ];

    /// Stable identifier used in result keys, catalog files and on the command line.
    pub fn id(&self) -> &'static str {
        match self {
            Engine::MySql => "mysql",
            Engine::Postgres => "postgres",
            Engine::MsSql2019 => "mssql-19",
            Engine::MsSql2022 => "mssql-22",
        }
    }

    /// Port the server listens on inside its container.
    pub fn default_port(&self) -> u16 {
        match self {
            Engine::MySql => 3306,
            Engine::Postgres => 5432,
            Engine::MsSql2019 | Engine::MsSql2022 => 1433,
        }
    }

    /// Whether the engine is reached through the SQL Server driver.
    pub fn is_mssql(&self) -> bool {
        matches!(self, Engine::MsSql2019 | Engine::MsSql2022)
    }

    /// Quote an identifier in the engine's dialect.
    ///
    /// Needed for reserved words such as `order`.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Engine::MySql => format!("`{}`", ident.replace('`', "``")),
            Engine::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Engine::MsSql2019 | Engine::MsSql2022 => format!("[{}]", ident.replace(']', "]]")),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Engine::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "mssql-19" | "mssql2019" | "mssql-2019" => Ok(Engine::MsSql2019),
            "mssql-22" | "mssql2022" | "mssql-2022" => Ok(Engine::MsSql2022),
            other => Err(Error::Config(format!(
                "unknown engine '{}', expected one of: mysql, postgres, mssql-19, mssql-22",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        for engine in Engine::ALL {
            assert_eq!(engine.id().parse::<Engine>().unwrap(), engine);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("PostgreSQL".parse::<Engine>().unwrap(), Engine::Postgres);
        assert_eq!("mssql2022".parse::<Engine>().unwrap(), Engine::MsSql2022);
        assert!("oracle".parse::<Engine>().is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(Engine::MySql.quote_ident("order"), "`order`");
        assert_eq!(Engine::Postgres.quote_ident("order"), "\"order\"");
        assert_eq!(Engine::MsSql2019.quote_ident("order"), "[order]");
        assert_eq!(Engine::MsSql2022.quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn test_serde_uses_ids() {
        let json = serde_json::to_string(&Engine::MsSql2019).unwrap();
        assert_eq!(json, "\"mssql-19\"");
    }
}
