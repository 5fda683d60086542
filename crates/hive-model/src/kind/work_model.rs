use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// How a pool decides how many workers it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkModel {
    /// Always run `max_workers` copies; replace workers as they exit.
    #[serde(alias = "oneshot")]
    Steady,
    /// Grow one worker at a time while the queue backlog is non-trivial and not shrinking.
    #[serde(alias = "longlived", alias = "demand")]
    DemandDriven,
}

impl WorkModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkModel::Steady => "steady",
            WorkModel::DemandDriven => "demand-driven",
        }
    }
}

impl fmt::Display for WorkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkModel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" | "oneshot" => Ok(WorkModel::Steady),
            "demand-driven" | "demand_driven" | "demand" | "longlived" => {
                Ok(WorkModel::DemandDriven)
            }
            _ => Err(ModelError::UnknownWorkModel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_legacy_names() {
        assert_eq!("steady".parse::<WorkModel>().unwrap(), WorkModel::Steady);
        assert_eq!("OneShot".parse::<WorkModel>().unwrap(), WorkModel::Steady);
        assert_eq!(
            "demand-driven".parse::<WorkModel>().unwrap(),
            WorkModel::DemandDriven
        );
        assert_eq!(
            "longlived".parse::<WorkModel>().unwrap(),
            WorkModel::DemandDriven
        );
        assert!("cron".parse::<WorkModel>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&WorkModel::DemandDriven).unwrap();
        assert_eq!(json, r#""demand-driven""#);
        let back: WorkModel = serde_json::from_str(r#""oneshot""#).unwrap();
        assert_eq!(back, WorkModel::Steady);
    }
}
