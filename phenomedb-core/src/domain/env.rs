//! Database environment selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical database environment a pipeline or task run executes against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbEnv {
    #[default]
    Prod,
    Beta,
    Test,
}

impl DbEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEnv::Prod => "PROD",
            DbEnv::Beta => "BETA",
            DbEnv::Test => "TEST",
        }
    }

    /// Reads a persisted value, treating absent or unknown values as `PROD`
    pub fn from_optional(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for DbEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROD" => Ok(DbEnv::Prod),
            "BETA" => Ok(DbEnv::Beta),
            "TEST" => Ok(DbEnv::Test),
            other => Err(format!("unknown db_env '{}'", other)),
        }
    }
}
