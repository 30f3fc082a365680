// 🧑‍💼 Representatives & Rosters
// A roster is a named group of representatives sharing one classification
// rule and one per-batch capacity. Rosters never share members.

use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 50;

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

// ============================================================================
// CLASSIFICATION RULE
// ============================================================================

/// Which `Classificacao_Conta` codes a roster may receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    /// Only these codes
    Include(Vec<String>),
    /// Every code except these
    Exclude(Vec<String>),
    /// No restriction
    Any,
}

/// Canonical form of a classification code: trimmed, and integral numeric
/// exports (`5.0`, `7.00`) reduced to their integer text.
pub fn normalize_code(code: &str) -> &str {
    let code = code.trim();
    match code.split_once('.') {
        Some((int, frac))
            if !int.is_empty()
                && int.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c == '0') =>
        {
            int
        }
        _ => code,
    }
}

impl ClassificationRule {
    pub fn matches(&self, code: &str) -> bool {
        let code = normalize_code(code);
        let listed = |codes: &[String]| codes.iter().any(|c| normalize_code(c) == code);
        match self {
            ClassificationRule::Include(codes) => listed(codes.as_slice()),
            ClassificationRule::Exclude(codes) => !listed(codes.as_slice()),
            ClassificationRule::Any => true,
        }
    }
}

// ============================================================================
// ROSTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    pub name: String,

    /// Representative names, exactly as they appear in `Nome_Vendedor`.
    pub members: Vec<String>,

    pub classification: ClassificationRule,

    /// Maximum accounts one member may receive per rotation batch.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Roster {
    pub fn new(name: &str, members: &[&str], classification: ClassificationRule) -> Self {
        Roster {
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            classification,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn contains(&self, representative: &str) -> bool {
        self.members.iter().any(|m| m == representative)
    }

    /// Members in configured order, first occurrence of repeated names only.
    pub fn active_members(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.members.len());
        for member in &self.members {
            if !out.contains(&member.as_str()) {
                out.push(member);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_rule() {
        let rule = ClassificationRule::Include(vec!["5".to_string(), "7".to_string()]);
        assert!(rule.matches("5"));
        assert!(rule.matches(" 7 "));
        assert!(!rule.matches("3"));
    }

    #[test]
    fn test_exclude_rule_is_complement() {
        let include = ClassificationRule::Include(vec!["5".to_string(), "7".to_string()]);
        let exclude = ClassificationRule::Exclude(vec!["5".to_string(), "7".to_string()]);

        for code in ["1", "2", "5", "7", "9", ""] {
            assert_ne!(include.matches(code), exclude.matches(code), "code {code}");
        }
    }

    #[test]
    fn test_numeric_export_codes_match() {
        let resale = ClassificationRule::Include(vec!["5".to_string(), "7".to_string()]);
        let retail = ClassificationRule::Exclude(vec!["5".to_string(), "7".to_string()]);

        assert!(resale.matches("5.0"));
        assert!(resale.matches(" 7.00 "));
        assert!(!retail.matches("5.0"));
        assert!(retail.matches("3.0"));
        assert!(!resale.matches("5.5"));
        assert_eq!(normalize_code("12.0"), "12");
        assert_eq!(normalize_code("A.0"), "A.0");
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: ClassificationRule = serde_json::from_str(r#"{"include": ["5", "7"]}"#).unwrap();
        assert_eq!(rule, ClassificationRule::Include(vec!["5".to_string(), "7".to_string()]));

        let any: ClassificationRule = serde_json::from_str(r#""any""#).unwrap();
        assert_eq!(any, ClassificationRule::Any);
    }

    #[test]
    fn test_roster_defaults_capacity() {
        let roster: Roster = serde_json::from_str(
            r#"{"name": "varejo", "members": ["Ana"], "classification": "any"}"#,
        )
        .unwrap();
        assert_eq!(roster.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_active_members_drops_repeats() {
        let roster = Roster::new("r", &["Ana", "Bruno", "Ana"], ClassificationRule::Any);
        assert_eq!(roster.active_members(), vec!["Ana", "Bruno"]);
    }
}
