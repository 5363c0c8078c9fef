use serde::{Deserialize, Serialize};

/// How a plan is sold. Only `online` plans are returned by searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellMode {
    Online,
    Offline,
}

impl SellMode {
    /// Parse the provider / database representation. Matching is exact.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(SellMode::Online),
            "offline" => Some(SellMode::Offline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SellMode::Online => "online",
            SellMode::Offline => "offline",
        }
    }
}

impl From<SellMode> for String {
    fn from(mode: SellMode) -> Self {
        mode.as_str().to_string()
    }
}

impl TryFrom<&str> for SellMode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid sell mode: {}", value))
    }
}

impl TryFrom<String> for SellMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}
