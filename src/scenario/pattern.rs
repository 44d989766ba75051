use serde::{Deserialize, Serialize};

/// A filter on a name. Directives use patterns to select every index combination they
/// apply to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Exact(String),
    Any,
    StartsWith(String),
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Any
    }
}

impl Pattern {
    pub fn exact(name: &str) -> Pattern {
        Pattern::Exact(name.to_string())
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(value) => value == name,
            Pattern::Any => true,
            Pattern::StartsWith(prefix) => name.starts_with(prefix.as_str()),
        }
    }

    /// The name an exact pattern must resolve to
    pub fn exact_name(&self) -> Option<&str> {
        match self {
            Pattern::Exact(value) => Some(value),
            _ => None,
        }
    }
}
