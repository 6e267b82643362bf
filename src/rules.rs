use std::fmt;

/// The effect of one resolution rule.
#[derive(Clone, Debug)]
pub enum RuleEffect {
    /// References with a matching origin never resolve to null.
    NeverNull,
    /// References with a matching origin may expand only to classes
    /// matching the pattern.
    ExpandsTo(String),
    /// References with a matching origin may alias only objects whose own
    /// origin matches the pattern.
    AliasesTo(String),
}

/// A rule pairing a glob over the textual origin of a symbolic reference
/// with a constraint on how it may be resolved.
#[derive(Clone, Debug)]
pub struct LicsRule {
    origin_pattern: String,
    effect: RuleEffect,
}

impl LicsRule {
    pub fn never_null(origin_pattern: &str) -> LicsRule {
        LicsRule {
            origin_pattern: origin_pattern.to_owned(),
            effect: RuleEffect::NeverNull,
        }
    }

    pub fn expands_to(origin_pattern: &str, class_pattern: &str) -> LicsRule {
        LicsRule {
            origin_pattern: origin_pattern.to_owned(),
            effect: RuleEffect::ExpandsTo(class_pattern.to_owned()),
        }
    }

    pub fn aliases_to(origin_pattern: &str, target_pattern: &str) -> LicsRule {
        LicsRule {
            origin_pattern: origin_pattern.to_owned(),
            effect: RuleEffect::AliasesTo(target_pattern.to_owned()),
        }
    }

    fn applies_to(&self, origin: &str) -> bool {
        glob_match(&self.origin_pattern, origin)
    }
}

impl fmt::Display for LicsRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.effect {
            RuleEffect::NeverNull => write!(f, "{} NEVER NULL", self.origin_pattern),
            RuleEffect::ExpandsTo(p) => write!(f, "{} EXPANDS {}", self.origin_pattern, p),
            RuleEffect::AliasesTo(p) => write!(f, "{} ALIASES {}", self.origin_pattern, p),
        }
    }
}

/// The ordered rule set consulted before the decision procedure: rules
/// prune resolution alternatives, they never add any.
#[derive(Clone, Debug, Default)]
pub struct LicsRules {
    rules: Vec<LicsRule>,
}

impl LicsRules {
    pub fn new(rules: Vec<LicsRule>) -> LicsRules {
        LicsRules { rules }
    }

    pub fn push(&mut self, rule: LicsRule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn allows_null(&self, origin: &str) -> bool {
        !self
            .rules
            .iter()
            .any(|r| matches!(r.effect, RuleEffect::NeverNull) && r.applies_to(origin))
    }

    /// An expansion to `class_name` is allowed when every applicable
    /// expands rule admits it; with no applicable rule everything goes.
    pub fn allows_expansion(&self, origin: &str, class_name: &str) -> bool {
        let applicable: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(origin))
            .filter_map(|r| match &r.effect {
                RuleEffect::ExpandsTo(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();
        applicable.is_empty() || applicable.iter().any(|p| glob_match(p, class_name))
    }

    /// An alias to an object with origin `target_origin` is allowed when
    /// every applicable aliases rule admits it.
    pub fn allows_alias(&self, origin: &str, target_origin: &str) -> bool {
        let applicable: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(origin))
            .filter_map(|r| match &r.effect {
                RuleEffect::AliasesTo(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();
        applicable.is_empty() || applicable.iter().any(|p| glob_match(p, target_origin))
    }
}

/// Glob matching with `*` for any run of characters and `?` for a single
/// character; everything else matches literally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_at(&p, 0, &t, 0)
}

fn glob_match_at(p: &[char], pi: usize, t: &[char], ti: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '*' => {
            for skip in 0..=(t.len() - ti) {
                if glob_match_at(p, pi + 1, t, ti + skip) {
                    return true;
                }
            }
            false
        }
        '?' => ti < t.len() && glob_match_at(p, pi + 1, t, ti + 1),
        c => ti < t.len() && t[ti] == c && glob_match_at(p, pi + 1, t, ti + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(glob_match("ROOT.*", "ROOT.next"));
        assert!(glob_match("ROOT.*.next", "ROOT.head.next"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("ROOT.*.next", "ROOT.head.prev"));
        assert!(glob_match("ROOT.?", "ROOT.a"));
        assert!(!glob_match("ROOT.?", "ROOT.ab"));
    }

    #[test]
    fn never_null_prunes_only_matching_origins() {
        let rules = LicsRules::new(vec![LicsRule::never_null("ROOT.next")]);
        assert!(!rules.allows_null("ROOT.next"));
        assert!(rules.allows_null("ROOT.prev"));
    }

    #[test]
    fn expansion_rules_restrict_classes() {
        let rules = LicsRules::new(vec![LicsRule::expands_to("ROOT.*", "pkg/Node*")]);
        assert!(rules.allows_expansion("ROOT.next", "pkg/Node"));
        assert!(rules.allows_expansion("ROOT.next", "pkg/NodeImpl"));
        assert!(!rules.allows_expansion("ROOT.next", "pkg/Other"));
        // No rule applies to this origin, so everything is allowed.
        assert!(rules.allows_expansion("X.y", "pkg/Other"));
    }

    #[test]
    fn alias_rules_restrict_target_origins() {
        let rules = LicsRules::new(vec![LicsRule::aliases_to("ROOT.*.next", "ROOT.*")]);
        assert!(rules.allows_alias("ROOT.a.next", "ROOT.b"));
        assert!(!rules.allows_alias("ROOT.a.next", "OTHER.b"));
    }
}
