use super::normalize::{Keyword, any_occurs, normalize};
use crate::taxonomy::CategoryId;
use std::collections::BTreeSet;

/// Coarse forbidden combination: any keyword present forbids every listed category.
#[derive(Debug, Clone)]
pub struct SanityRule {
    pub name: String,
    pub keywords: Vec<Keyword>,
    pub forbidden_categories: BTreeSet<CategoryId>,
}

impl SanityRule {
    pub fn fires_on(&self, text: &str) -> bool {
        any_occurs(&self.keywords, text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SanityRules {
    rules: Vec<SanityRule>,
}

impl SanityRules {
    pub fn new(rules: Vec<SanityRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[SanityRule] {
        &self.rules
    }

    /// True when any rule fires on `title + " " + description` and forbids `id`.
    pub fn violates(&self, id: CategoryId, title: &str, description: &str) -> bool {
        let text = normalize(&format!("{title} {description}"));
        self.rules
            .iter()
            .any(|rule| rule.forbidden_categories.contains(&id) && rule.fires_on(&text))
    }

    /// Every category forbidden for already-normalized `text`, computed in one pass.
    pub fn blocked(&self, text: &str) -> BTreeSet<CategoryId> {
        self.rules
            .iter()
            .filter(|rule| rule.fires_on(text))
            .flat_map(|rule| rule.forbidden_categories.iter().copied())
            .collect()
    }

    /// Names of the rules that forbid `id` for `text`.
    pub fn fired_for(&self, id: CategoryId, text: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.forbidden_categories.contains(&id) && rule.fires_on(text))
            .map(|rule| rule.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SanityRules {
        let kws = |raw: &[&str]| {
            raw.iter()
                .map(|kw| Keyword::parse(kw).expect("keyword"))
                .collect::<Vec<_>>()
        };
        SanityRules::new(vec![
            SanityRule {
                name: "toys".into(),
                keywords: kws(&["ตุ๊กตา", "doll"]),
                forbidden_categories: BTreeSet::from([1, 3, 4]),
            },
            SanityRule {
                name: "printers".into(),
                keywords: kws(&["printer"]),
                forbidden_categories: BTreeSet::from([8]),
            },
        ])
    }

    #[test]
    fn fires_only_for_forbidden_categories() {
        let rules = rules();
        assert!(rules.violates(4, "Barbie DOLL house", ""));
        assert!(!rules.violates(15, "Barbie DOLL house", ""));
        assert!(!rules.violates(4, "gaming laptop", "fast"));
    }

    #[test]
    fn keyword_may_appear_in_description() {
        assert!(rules().violates(8, "Canon MF4450", "laser Printer for office"));
    }

    #[test]
    fn keyword_split_across_fields_does_not_fire() {
        // "print" + "er" only meet at the joining space
        assert!(!rules().violates(8, "print", "er"));
    }

    #[test]
    fn blocked_unions_all_firing_rules() {
        let rules = rules();
        assert_eq!(
            rules.blocked("doll printer"),
            BTreeSet::from([1, 3, 4, 8])
        );
        assert!(rules.blocked("").is_empty());
        assert_eq!(rules.fired_for(8, "doll printer"), vec!["printers"]);
    }
}
