use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Review strictness preset. `+` variants keep the same confidence bars but
/// disable the false-positive kill list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Strict,
    #[default]
    Default,
    Lenient,
    #[serde(rename = "strict+", alias = "strict_plus")]
    StrictPlus,
    #[serde(rename = "default+", alias = "default_plus")]
    DefaultPlus,
    #[serde(rename = "lenient+", alias = "lenient_plus")]
    LenientPlus,
}

impl Strictness {
    /// `(min_keep, min_maintainability)` confidence thresholds.
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            Self::Strict | Self::StrictPlus => (0.6, 0.7),
            Self::Default | Self::DefaultPlus => (0.8, 0.9),
            Self::Lenient | Self::LenientPlus => (0.9, 0.95),
        }
    }

    pub fn fp_kill_enabled(self) -> bool {
        matches!(self, Self::Strict | Self::Default | Self::Lenient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Default => "default",
            Self::Lenient => "lenient",
            Self::StrictPlus => "strict+",
            Self::DefaultPlus => "default+",
            Self::LenientPlus => "lenient+",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "default" | "" => Ok(Self::Default),
            "lenient" => Ok(Self::Lenient),
            "strict+" | "strict_plus" => Ok(Self::StrictPlus),
            "default+" | "default_plus" => Ok(Self::DefaultPlus),
            "lenient+" | "lenient_plus" => Ok(Self::LenientPlus),
            other => Err(format!("unknown strictness: {other}")),
        }
    }
}

/// Why a finding left the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    FalsePositive,
    AlreadyCorrect,
    WrongLocation,
    WontFix,
    OutOfScope,
}

impl DismissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FalsePositive => "false_positive",
            Self::AlreadyCorrect => "already_correct",
            Self::WrongLocation => "wrong_location",
            Self::WontFix => "wont_fix",
            Self::OutOfScope => "out_of_scope",
        }
    }
}

impl FromStr for DismissReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "false_positive" => Ok(Self::FalsePositive),
            "already_correct" => Ok(Self::AlreadyCorrect),
            "wrong_location" => Ok(Self::WrongLocation),
            "wont_fix" => Ok(Self::WontFix),
            "out_of_scope" => Ok(Self::OutOfScope),
            other => Err(format!("unknown dismissal reason: {other}")),
        }
    }
}
