// ⚙️ Rotation Configuration - rosters as data
// Loaded from JSON, validated once at load time.

use crate::entities::{ClassificationRule, Roster};
use crate::error::{RotationError, RotationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn default_cutoff_days() -> u32 {
    180
}

fn default_recent_window_months() -> u32 {
    6
}

fn default_commit_retries() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Inactivity threshold in days: accounts idle longer than this become eligible.
    #[serde(default = "default_cutoff_days")]
    pub cutoff_days: u32,

    /// Calendar-month window used by the report for recent arrivals and registrations.
    #[serde(default = "default_recent_window_months")]
    pub recent_window_months: u32,

    /// Extra attempts when committing assignments to the history store.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Processed in this order; an account goes to the first roster whose
    /// rule accepts it.
    pub rosters: Vec<Roster>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        let resale_codes = vec!["5".to_string(), "7".to_string()];
        RotationConfig {
            cutoff_days: default_cutoff_days(),
            recent_window_months: default_recent_window_months(),
            commit_retries: default_commit_retries(),
            rosters: vec![
                Roster::new("revenda", &[], ClassificationRule::Include(resale_codes.clone())),
                Roster::new("varejo", &[], ClassificationRule::Exclude(resale_codes)),
            ],
        }
    }
}

impl RotationConfig {
    /// Load and validate rosters from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> RotationResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RotationError::config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> RotationResult<Self> {
        let config: RotationConfig = serde_json::from_str(content)
            .map_err(|e| RotationError::config(format!("failed to parse roster JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RotationResult<()> {
        if self.rosters.is_empty() {
            return Err(RotationError::config("at least one roster is required"));
        }

        let mut member_of: HashMap<&str, &str> = HashMap::new();

        for (i, roster) in self.rosters.iter().enumerate() {
            if roster.name.trim().is_empty() {
                return Err(RotationError::config(format!("roster #{} has no name", i + 1)));
            }

            if self.rosters[..i].iter().any(|r| r.name == roster.name) {
                return Err(RotationError::config(format!(
                    "duplicate roster '{}'",
                    roster.name
                )));
            }

            for member in roster.active_members() {
                if let Some(other) = member_of.insert(member, &roster.name) {
                    if other != roster.name {
                        return Err(RotationError::config(format!(
                            "representative '{}' is in both '{}' and '{}'",
                            member, other, roster.name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn roster(&self, name: &str) -> Option<&Roster> {
        self.rosters.iter().find(|r| r.name == name)
    }

    /// Roster a representative belongs to, if any.
    pub fn roster_of(&self, representative: &str) -> Option<&Roster> {
        self.rosters.iter().find(|r| r.contains(representative))
    }

    /// Every configured representative, roster by roster.
    pub fn all_members(&self) -> Vec<&str> {
        self.rosters.iter().flat_map(|r| r.active_members()).collect()
    }
}
