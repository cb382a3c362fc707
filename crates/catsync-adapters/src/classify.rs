//! Ordered keyword rule tables. The first matching rule wins, so the order of
//! rules in a table is part of its behavior. Keywords match at the start of a
//! word, so `dj` hits "DJ set" but not "adjust" while `skydiv` still hits
//! "skydiving".

use std::path::Path;

use catsync_core::SyncFlavor;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule table fallback category must not be empty")]
    EmptyFallback,
    #[error("rule #{index} has an empty category")]
    EmptyCategory { index: usize },
    #[error("rule #{index} ({category}) has no keywords")]
    NoKeywords { index: usize, category: String },
    #[error("rule #{index} keywords do not compile: {source}")]
    Pattern {
        index: usize,
        #[source]
        source: regex::Error,
    },
    #[error("reading rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rules yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub category: String,
    pub keywords: Vec<String>,
}

impl Rule {
    pub fn new(category: &str, keywords: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
    matchers: Vec<Regex>,
    fallback: String,
}

impl PartialEq for RuleTable {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules && self.fallback == other.fallback
    }
}

impl Eq for RuleTable {}

impl RuleTable {
    /// Keywords are lower-cased and blank keywords dropped.
    pub fn new(rules: Vec<Rule>, fallback: impl Into<String>) -> Result<Self, RuleError> {
        let fallback = fallback.into().trim().to_string();
        if fallback.is_empty() {
            return Err(RuleError::EmptyFallback);
        }
        let mut normalized = Vec::with_capacity(rules.len());
        let mut matchers = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            let category = rule.category.trim().to_string();
            if category.is_empty() {
                return Err(RuleError::EmptyCategory { index });
            }
            let keywords: Vec<String> = rule
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(RuleError::NoKeywords { index, category });
            }
            let alternation: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
            let matcher = Regex::new(&format!(r"\b(?:{})", alternation.join("|")))
                .map_err(|source| RuleError::Pattern { index, source })?;
            normalized.push(Rule { category, keywords });
            matchers.push(matcher);
        }
        Ok(Self {
            rules: normalized,
            matchers,
            fallback,
        })
    }

    pub fn events() -> Self {
        Self::builtin(
            vec![
                Rule::new("family", &["kids", "children", "family", "toddler"]),
                Rule::new("comedy", &["comedy", "stand-up", "standup", "comedian"]),
                Rule::new(
                    "sports",
                    &["football", "tennis", "cricket", "boxing", "marathon", "ufc", "golf", "grand prix"],
                ),
                Rule::new("theatre", &["theatre", "theater", "musical", "opera", "ballet"]),
                Rule::new("nightlife", &["party", "club night", "brunch", "ladies night"]),
                Rule::new(
                    "music",
                    &["concert", "live music", "dj", "festival", "jazz", "orchestra", "world tour"],
                ),
                Rule::new("exhibitions", &["exhibition", "expo", "gallery", "museum"]),
                Rule::new("conferences", &["conference", "summit", "workshop", "masterclass"]),
            ],
            "other",
        )
    }

    pub fn attractions() -> Self {
        Self::builtin(
            vec![
                Rule::new(
                    "family",
                    &["kids", "children", "family", "theme park", "waterpark", "water park", "zoo", "aquarium"],
                ),
                Rule::new(
                    "water-sports",
                    &["diving", "snorkel", "jet ski", "jetski", "kayak", "parasail", "flyboard", "surf"],
                ),
                Rule::new("desert", &["desert", "safari", "dune", "camel", "bedouin"]),
                Rule::new("cruises", &["cruise", "dhow", "yacht", "boat"]),
                Rule::new(
                    "adventure",
                    &["skydiv", "zipline", "zip line", "bungee", "helicopter", "balloon", "climbing"],
                ),
                Rule::new("tours", &["tour", "sightseeing", "city walk", "guided"]),
            ],
            "experiences",
        )
    }

    pub fn for_flavor(flavor: SyncFlavor) -> Self {
        match flavor {
            SyncFlavor::Events => Self::events(),
            SyncFlavor::Attractions => Self::attractions(),
        }
    }

    fn builtin(rules: Vec<Rule>, fallback: &str) -> Self {
        Self::new(rules, fallback).expect("built-in rule tables are valid")
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Total: returns the fallback when no rule matches.
    pub fn classify(&self, title: &str, description: Option<&str>) -> &str {
        let haystack = format!("{} {}", title, description.unwrap_or_default()).to_lowercase();
        self.rules
            .iter()
            .zip(&self.matchers)
            .find(|(_, matcher)| matcher.is_match(&haystack))
            .map(|(rule, _)| rule.category.as_str())
            .unwrap_or(self.fallback.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    events: Option<TableSection>,
    #[serde(default)]
    attractions: Option<TableSection>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSection {
    fallback: String,
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Rule tables for both flavors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRules {
    events: RuleTable,
    attractions: RuleTable,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            events: RuleTable::events(),
            attractions: RuleTable::attractions(),
        }
    }
}

impl ClassificationRules {
    /// Sections missing from the file keep the built-in table.
    pub fn from_yaml_str(text: &str) -> Result<Self, RuleError> {
        let file: RulesFile = serde_yaml::from_str(text)?;
        let defaults = Self::default();
        let events = match file.events {
            Some(section) => RuleTable::new(section.rules, section.fallback)?,
            None => defaults.events,
        };
        let attractions = match file.attractions {
            Some(section) => RuleTable::new(section.rules, section.fallback)?,
            None => defaults.attractions,
        };
        Ok(Self {
            events,
            attractions,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn table(&self, flavor: SyncFlavor) -> &RuleTable {
        match flavor {
            SyncFlavor::Events => &self.events,
            SyncFlavor::Attractions => &self.attractions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_rules_by_example() {
        let table = RuleTable::events();
        let cases = [
            ("Kids Science Show", None, "family"),
            ("Rooftop Jazz Night", Some("Live music under the stars"), "music"),
            ("Friday Brunch Party", None, "nightlife"),
            ("Stand-Up Night", Some("with a family friendly opener"), "family"),
            ("The Phantom of the Opera", None, "theatre"),
            ("Tech Summit 2026", None, "conferences"),
            ("Quiet Evening", Some("nothing else to say"), "other"),
        ];
        for (title, description, expected) in cases {
            assert_eq!(table.classify(title, description), expected, "{title}");
        }
    }

    #[test]
    fn attraction_rules_by_example() {
        let table = RuleTable::attractions();
        assert_eq!(table.classify("Pearl Diving Tour!!", None), "water-sports");
        assert_eq!(table.classify("Evening Desert Safari", Some("BBQ dinner")), "desert");
        assert_eq!(table.classify("Marina Dhow Cruise", None), "cruises");
        assert_eq!(table.classify("Old Dubai Walking TOUR", None), "tours");
        assert_eq!(table.classify("Burj Observation Deck", Some("")), "experiences");
    }

    #[test]
    fn earlier_rule_wins_on_overlap() {
        let text = ("Family Desert Tour", Some("fun for the kids"));
        assert_eq!(RuleTable::attractions().classify(text.0, text.1), "family");

        let reordered = RuleTable::new(
            vec![
                Rule::new("tours", &["tour"]),
                Rule::new("family", &["family", "kids"]),
            ],
            "experiences",
        )
        .unwrap();
        assert_eq!(reordered.classify(text.0, text.1), "tours");
    }

    #[test]
    fn keywords_do_not_fire_inside_other_words() {
        let events = RuleTable::events();
        assert_eq!(events.classify("Adjustable Desk Workshop", None), "conferences");
        assert_eq!(events.classify("Sunset DJ Set", None), "music");
        assert_eq!(events.classify("Golfer's Gala", Some("a golfing evening")), "sports");

        let attractions = RuleTable::attractions();
        assert_eq!(attractions.classify("Bazooka Paintball", None), "experiences");
        assert_eq!(attractions.classify("Tandem Skydiving", None), "adventure");
    }

    #[test]
    fn description_participates_in_matching() {
        let table = RuleTable::events();
        assert_eq!(table.classify("Saturday Special", Some("A stand-up COMEDY lineup")), "comedy");
    }

    #[test]
    fn invalid_tables_are_rejected() {
        assert!(matches!(
            RuleTable::new(vec![], "  "),
            Err(RuleError::EmptyFallback)
        ));
        assert!(matches!(
            RuleTable::new(vec![Rule::new("music", &[" "])], "other"),
            Err(RuleError::NoKeywords { index: 0, .. })
        ));
        assert!(matches!(
            RuleTable::new(vec![Rule::new("", &["x"])], "other"),
            Err(RuleError::EmptyCategory { index: 0 })
        ));
    }

    #[test]
    fn yaml_overrides_only_the_sections_it_names() {
        let yaml = r#"
version: 1
events:
  fallback: misc
  rules:
    - category: Tours
      keywords: [" TOUR "]
    - category: family
      keywords: [kids]
"#;
        let rules = ClassificationRules::from_yaml_str(yaml).unwrap();
        let events = rules.table(SyncFlavor::Events);
        assert_eq!(events.rules()[0].keywords, vec!["tour".to_string()]);
        assert_eq!(events.classify("Kids City Tour", None), "Tours");
        assert_eq!(events.classify("Gala", None), "misc");
        assert_eq!(rules.table(SyncFlavor::Attractions), &RuleTable::attractions());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(ClassificationRules::from_yaml_str("events: [").is_err());
    }
}
