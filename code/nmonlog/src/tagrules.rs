/// Configured derivation of extra tags from existing ones.
///
/// A rule says: for points of measurement M (or of any measurement, when M is `_ALL`), if tag K
/// has a value matching the pattern, set tag T to V.  Rules are not exclusive: every matching rule
/// is applied, in configuration order, so when several rules set the same tag the last one wins.
/// The measurement-scoped rules for a tag run before the wildcard rules for that tag.
use crate::error::{ImportError, Result};

use nmonutils::TagInput;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// The measurement scope that applies to every measurement.
pub const ALL_MEASUREMENTS: &str = "_ALL";

#[derive(Debug)]
struct TagRule {
    pattern: Regex,
    tag: String,
    value: String,
}

/// measurement -> source tag -> rules in configuration order

#[derive(Debug, Default)]
pub struct TagRules {
    rules: HashMap<String, HashMap<String, Vec<TagRule>>>,
}

impl TagRules {
    /// Compile the configured rules.  A pattern that is not a valid regular expression makes the
    /// whole configuration invalid.

    pub fn new(inputs: &[TagInput]) -> Result<TagRules> {
        let mut rules = HashMap::<String, HashMap<String, Vec<TagRule>>>::new();
        for input in inputs {
            let pattern = Regex::new(&input.pattern).map_err(|e| {
                ImportError::ConfigInvalid(format!(
                    "Bad pattern '{}' for tag '{}': {e}",
                    input.pattern, input.name
                ))
            })?;
            rules
                .entry(input.measurement.clone())
                .or_default()
                .entry(input.name.clone())
                .or_default()
                .push(TagRule {
                    pattern,
                    tag: input.tag.clone(),
                    value: input.value.clone(),
                });
        }
        Ok(TagRules { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the rules for `measurement` to a point's tags.  The source tags are the ones present
    /// when this is called, visited in key order.  Tags added by a rule are not visited.

    pub fn apply(&self, measurement: &str, tags: &mut BTreeMap<String, String>) {
        if self.rules.is_empty() {
            return;
        }
        let scoped = self.rules.get(measurement);
        let wildcard = self.rules.get(ALL_MEASUREMENTS);
        if scoped.is_none() && wildcard.is_none() {
            return;
        }
        let keys = tags.keys().cloned().collect::<Vec<String>>();
        for key in keys {
            for scope in [scoped, wildcard].into_iter().flatten() {
                let Some(rules) = scope.get(&key) else {
                    continue;
                };
                for rule in rules {
                    // An earlier rule may have replaced the source value.
                    let Some(value) = tags.get(&key) else {
                        break;
                    };
                    if rule.pattern.is_match(value) {
                        tags.insert(rule.tag.clone(), rule.value.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
fn input(measurement: &str, name: &str, pattern: &str, tag: &str, value: &str) -> TagInput {
    TagInput {
        measurement: measurement.to_string(),
        name: name.to_string(),
        pattern: pattern.to_string(),
        tag: tag.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
fn host_tags(host: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("host".to_string(), host.to_string());
    tags.insert("name".to_string(), "CPU_ALL".to_string());
    tags
}

#[test]
fn test_scoped_rule() {
    let rules = TagRules::new(&[input("CPU_ALL", "host", "^web", "role", "frontend")]).unwrap();

    let mut web = host_tags("web01");
    rules.apply("CPU_ALL", &mut web);
    assert!(web.get("role").map(|s| s.as_str()) == Some("frontend"));

    let mut db = host_tags("db01");
    rules.apply("CPU_ALL", &mut db);
    assert!(db.get("role").is_none());

    // Other measurements are not in scope
    let mut mem = host_tags("web01");
    rules.apply("MEM", &mut mem);
    assert!(mem.get("role").is_none());
}

#[test]
fn test_wildcard_and_order() {
    let rules = TagRules::new(&[
        input("_ALL", "host", "^db", "role", "database"),
        input("MEM", "host", ".*01$", "rack", "a"),
        input("MEM", "host", "^db", "rack", "b"),
        input("MEM", "host", "^db", "role", "scoped"),
    ])
    .unwrap();

    let mut tags = host_tags("db01");
    rules.apply("MEM", &mut tags);
    // Every match applies, last one wins, and wildcard rules run after scoped ones
    assert!(tags["rack"] == "b");
    assert!(tags["role"] == "database");

    let mut tags = host_tags("db02");
    rules.apply("DISKBUSY", &mut tags);
    assert!(tags["role"] == "database");
    assert!(tags.get("rack").is_none());
}

#[test]
fn test_bad_pattern() {
    assert!(matches!(
        TagRules::new(&[input("_ALL", "host", "(unclosed", "role", "x")]),
        Err(ImportError::ConfigInvalid(_))
    ));
    assert!(TagRules::new(&[]).unwrap().is_empty());
}
