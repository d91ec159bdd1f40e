use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Log entry type PagerDuty writes when an incident moves up its escalation policy.
pub const ESCALATION_LOG_ENTRY_TYPE: &str = "escalate_log_entry";

/// Resolution value marking an incident as closed by the resolution team.
pub const DEFAULT_RESOLUTION_TEAM_LITERAL: &str = "ccoe";

/// Infrastructure root causes recognized in `prelim_root_cause`.
pub const DEFAULT_ROOT_CAUSE_TAXONOMY: [&str; 3] = ["rheos", "hadoop", "tess"];

pub fn is_escalation_entry(entry_type: &str) -> bool {
    entry_type == ESCALATION_LOG_ENTRY_TYPE
}

/// Rules that turn custom field values into derived record attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRules {
    pub resolution_team_literal: String,
    pub root_cause_taxonomy: BTreeSet<String>,
}

impl Default for EnrichmentRules {
    fn default() -> Self {
        Self {
            resolution_team_literal: DEFAULT_RESOLUTION_TEAM_LITERAL.to_string(),
            root_cause_taxonomy: DEFAULT_ROOT_CAUSE_TAXONOMY
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }
}

impl EnrichmentRules {
    /// Builds rules, normalizing every literal to trimmed lowercase.
    pub fn new<I, S>(resolution_team_literal: &str, root_cause_taxonomy: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            resolution_team_literal: normalize(resolution_team_literal),
            root_cause_taxonomy: root_cause_taxonomy
                .into_iter()
                .map(|value| normalize(value.as_ref()))
                .filter(|value| !value.is_empty())
                .collect(),
        }
    }

    /// True when the `resolution` field names the resolution team. Absent values are false.
    pub fn resolved_by_team(&self, resolution: Option<&str>) -> bool {
        resolution.is_some_and(|value| normalize(value) == self.resolution_team_literal)
    }

    /// Taxonomy label for a `prelim_root_cause` value, or `None` when unrecognized.
    pub fn classify_root_cause(&self, value: Option<&str>) -> Option<String> {
        let normalized = normalize(value?);
        self.root_cause_taxonomy
            .contains(&normalized)
            .then_some(normalized)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{is_escalation_entry, EnrichmentRules};
    use proptest::prelude::*;

    #[test]
    fn resolution_literal_matches_any_casing() {
        let rules = EnrichmentRules::default();
        assert!(rules.resolved_by_team(Some("CCOE")));
        assert!(rules.resolved_by_team(Some("ccoe")));
        assert!(rules.resolved_by_team(Some("Ccoe")));
        assert!(rules.resolved_by_team(Some(" ccoe \n")));
    }

    #[test]
    fn absent_or_other_resolution_is_false() {
        let rules = EnrichmentRules::default();
        assert!(!rules.resolved_by_team(None));
        assert!(!rules.resolved_by_team(Some("")));
        assert!(!rules.resolved_by_team(Some("team")));
    }

    #[test]
    fn root_cause_outside_taxonomy_is_null() {
        let rules = EnrichmentRules::default();
        assert_eq!(
            rules.classify_root_cause(Some("Rheos")),
            Some("rheos".to_string())
        );
        assert_eq!(rules.classify_root_cause(Some("cosmic rays")), None);
        assert_eq!(rules.classify_root_cause(None), None);
    }

    #[test]
    fn custom_rules_are_normalized() {
        let rules = EnrichmentRules::new(" SRE ", ["Kafka", " ", "ZOOKEEPER"]);
        assert!(rules.resolved_by_team(Some("sre")));
        assert_eq!(rules.root_cause_taxonomy.len(), 2);
        assert_eq!(
            rules.classify_root_cause(Some("zookeeper")),
            Some("zookeeper".to_string())
        );
    }

    #[test]
    fn only_escalate_entries_count_as_escalation() {
        assert!(is_escalation_entry("escalate_log_entry"));
        assert!(!is_escalation_entry("acknowledge_log_entry"));
        assert!(!is_escalation_entry("trigger_log_entry"));
    }

    proptest! {
        #[test]
        fn resolution_match_ignores_ascii_case(mask in proptest::collection::vec(any::<bool>(), 4)) {
            let rules = EnrichmentRules::default();
            let value: String = "ccoe"
                .chars()
                .zip(mask)
                .map(|(ch, upper)| if upper { ch.to_ascii_uppercase() } else { ch })
                .collect();
            prop_assert!(rules.resolved_by_team(Some(value.as_str())));
        }
    }
}
