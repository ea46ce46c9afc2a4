use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Probe grouping. Declaration order is the scan order and the fix priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Health,
    Drivers,
    Security,
    Desktop,
    /// Post-install setup. Only scanned when selected explicitly.
    Setup,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Health,
        Category::Drivers,
        Category::Security,
        Category::Desktop,
        Category::Setup,
    ];

    /// Categories a scan covers when none are configured or requested.
    pub const DEFAULT: [Category; 4] = [
        Category::Health,
        Category::Drivers,
        Category::Security,
        Category::Desktop,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Health => "HEALTH",
            Category::Drivers => "DRIVERS",
            Category::Security => "SECURITY",
            Category::Desktop => "DESKTOP",
            Category::Setup => "SETUP",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Category::Health => "System health",
            Category::Drivers => "Drivers & hardware",
            Category::Security => "Security",
            Category::Desktop => "Desktop environment",
            Category::Setup => "Post-install setup",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "health" => Ok(Category::Health),
            "drivers" | "driver" | "hardware" => Ok(Category::Drivers),
            "security" => Ok(Category::Security),
            "desktop" => Ok(Category::Desktop),
            "setup" | "post-install" | "postinstall" => Ok(Category::Setup),
            other => Err(format!(
                "unknown category: {other} (expected health|drivers|security|desktop|setup)"
            )),
        }
    }
}
