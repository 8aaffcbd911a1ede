use super::normalize::{Keyword, NormalizedInput, normalize};
use crate::taxonomy::Category;
use serde::{Deserialize, Serialize};

/// Per-hit weights for a channel that distinguishes whole-word from substring hits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    pub exact: f64,
    pub substring: f64,
    pub cap: f64,
    pub name_bonus: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitWeights {
    pub per_hit: f64,
    pub cap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub image: ChannelWeights,
    pub title: ChannelWeights,
    pub objects: HitWeights,
    pub description: HitWeights,
    /// Overall cap on the channel sum, and the confidence scale.
    pub max_score: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            image: ChannelWeights {
                exact: 25.0,
                substring: 10.0,
                cap: 40.0,
                name_bonus: 25.0,
            },
            title: ChannelWeights {
                exact: 20.0,
                substring: 8.0,
                cap: 35.0,
                name_bonus: 20.0,
            },
            objects: HitWeights {
                per_hit: 8.0,
                cap: 15.0,
            },
            description: HitWeights {
                per_hit: 5.0,
                cap: 10.0,
            },
            max_score: 100.0,
        }
    }
}

impl ScoringWeights {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (label, channel) in [("image", &self.image), ("title", &self.title)] {
            if channel.exact <= channel.substring {
                problems.push(format!("{label}: exact weight must exceed substring weight"));
            }
            if [channel.exact, channel.substring, channel.cap, channel.name_bonus]
                .iter()
                .any(|value| !value.is_finite() || *value < 0.0)
            {
                problems.push(format!("{label}: weights must be finite and non-negative"));
            }
        }
        for (label, channel) in [("objects", &self.objects), ("description", &self.description)] {
            if [channel.per_hit, channel.cap]
                .iter()
                .any(|value| !value.is_finite() || *value < 0.0)
            {
                problems.push(format!("{label}: weights must be finite and non-negative"));
            }
        }
        if !self.max_score.is_finite() || self.max_score <= 0.0 {
            problems.push("max_score must be positive".to_string());
        }
        problems
    }
}

/// Points and hit counts per channel for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelBreakdown {
    pub image: f64,
    pub image_hits: usize,
    pub title: f64,
    pub title_hits: usize,
    pub objects: f64,
    pub object_hits: usize,
    pub description: f64,
    pub description_hits: usize,
}

impl ChannelBreakdown {
    pub fn total(&self, max_score: f64) -> f64 {
        (self.image + self.title + self.objects + self.description).min(max_score)
    }

    pub fn describe(&self) -> Vec<String> {
        [
            ("title", self.title, self.title_hits),
            ("image", self.image, self.image_hits),
            ("objects", self.objects, self.object_hits),
            ("description", self.description, self.description_hits),
        ]
        .into_iter()
        .filter(|(_, points, _)| *points > 0.0)
        .map(|(channel, points, hits)| format!("{channel} +{points} ({hits} hits)"))
        .collect()
    }
}

/// Scores one category against the four channels. Pure and order-independent.
pub fn score_channels(
    category: &Category,
    keywords: &[Keyword],
    input: &NormalizedInput,
    weights: &ScoringWeights,
) -> ChannelBreakdown {
    let names = display_names(category);
    let (image, image_hits) = text_channel(&input.image_analysis, keywords, &names, &weights.image);
    let (title, title_hits) = text_channel(&input.title, keywords, &names, &weights.title);

    let mut object_hits = 0;
    for object in &input.detected_objects {
        object_hits += keywords
            .iter()
            .filter(|kw| object.contains(kw.text()) || kw.text().contains(object.as_str()))
            .count();
    }
    let objects = (object_hits as f64 * weights.objects.per_hit).min(weights.objects.cap);

    let description_hits = keywords
        .iter()
        .filter(|kw| kw.occurs_in(&input.description))
        .count();
    let description =
        (description_hits as f64 * weights.description.per_hit).min(weights.description.cap);

    ChannelBreakdown {
        image,
        image_hits,
        title,
        title_hits,
        objects,
        object_hits,
        description,
        description_hits,
    }
}

fn text_channel(
    text: &str,
    keywords: &[Keyword],
    names: &[String],
    weights: &ChannelWeights,
) -> (f64, usize) {
    if text.is_empty() {
        return (0.0, 0);
    }
    let mut points = 0.0;
    let mut hits = 0;
    for keyword in keywords.iter().filter(|kw| kw.occurs_in(text)) {
        hits += 1;
        points += if keyword.is_word_in(text) {
            weights.exact
        } else {
            weights.substring
        };
    }
    points += names.iter().filter(|name| text.contains(name.as_str())).count() as f64
        * weights.name_bonus;
    (points.min(weights.cap), hits)
}

fn display_names(category: &Category) -> Vec<String> {
    let mut names: Vec<String> = category
        .names
        .values()
        .chain(std::iter::once(&category.slug))
        .map(|name| normalize(name))
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClassificationInput;
    use std::collections::BTreeMap;

    fn category() -> Category {
        Category {
            id: 8,
            slug: "cameras".into(),
            names: BTreeMap::from([
                ("en".to_string(), "Cameras".to_string()),
                ("th".to_string(), "กล้องถ่ายรูป".to_string()),
            ]),
            parent_id: None,
        }
    }

    fn keywords(raw: &[&str]) -> Vec<Keyword> {
        raw.iter()
            .map(|kw| Keyword::parse(kw).expect("keyword"))
            .collect()
    }

    fn input(title: &str, description: &str) -> NormalizedInput {
        NormalizedInput::new(&ClassificationInput {
            title: title.into(),
            description: description.into(),
            ..ClassificationInput::default()
        })
    }

    #[test]
    fn exact_title_hit_outweighs_substring_hit() {
        let weights = ScoringWeights::default();
        let kws = keywords(&["canon"]);
        let exact = score_channels(&category(), &kws, &input("canon eos", ""), &weights);
        let partial = score_channels(&category(), &kws, &input("canonical", ""), &weights);
        assert_eq!(exact.title, 20.0);
        assert_eq!(partial.title, 8.0);
        assert_eq!(exact.title_hits, 1);
    }

    #[test]
    fn channels_are_capped_independently() {
        let weights = ScoringWeights::default();
        let kws = keywords(&["canon", "eos", "r6", "mirrorless", "lens", "full frame"]);
        let mut norm = input(
            "canon eos r6 mirrorless",
            "canon eos r6 mirrorless lens full frame",
        );
        norm.image_analysis = "canon eos r6 mirrorless lens".into();
        norm.detected_objects = vec!["lens".into(), "canon".into(), "eos r6".into()];
        let breakdown = score_channels(&category(), &kws, &norm, &weights);
        assert_eq!(breakdown.title, 35.0);
        assert_eq!(breakdown.image, 40.0);
        assert_eq!(breakdown.objects, 15.0);
        assert_eq!(breakdown.description, 10.0);
        assert_eq!(breakdown.total(weights.max_score), 100.0);
    }

    #[test]
    fn name_bonus_is_paid_per_matching_name() {
        let weights = ScoringWeights::default();
        let norm = input("ขาย กล้องถ่ายรูป cameras", "");
        let breakdown = score_channels(&category(), &[], &norm, &weights);
        // th name and the english name (which equals the slug) both appear
        assert_eq!(breakdown.title, 35.0);
        let single = score_channels(&category(), &[], &input("กล้องถ่ายรูป", ""), &weights);
        assert_eq!(single.title, 20.0);
    }

    #[test]
    fn detected_objects_match_in_either_direction() {
        let weights = ScoringWeights::default();
        let kws = keywords(&["camera body"]);
        let mut norm = input("", "");
        norm.detected_objects = vec!["camera".into()];
        assert_eq!(score_channels(&category(), &kws, &norm, &weights).objects, 8.0);
        norm.detected_objects = vec!["black camera body".into()];
        assert_eq!(score_channels(&category(), &kws, &norm, &weights).objects, 8.0);
    }

    #[test]
    fn description_counts_substring_hits_only() {
        let weights = ScoringWeights::default();
        let kws = keywords(&["lens"]);
        let breakdown = score_channels(&category(), &kws, &input("", "lenses included"), &weights);
        assert_eq!(breakdown.description, 5.0);
        assert_eq!(breakdown.describe(), vec!["description +5 (1 hits)".to_string()]);
    }

    #[test]
    fn empty_input_scores_zero() {
        let weights = ScoringWeights::default();
        let kws = keywords(&["camera"]);
        let breakdown = score_channels(&category(), &kws, &input("", ""), &weights);
        assert_eq!(breakdown, ChannelBreakdown::default());
        assert!(breakdown.describe().is_empty());
    }

    #[test]
    fn default_weights_are_consistent() {
        assert!(ScoringWeights::default().problems().is_empty());
        let mut weights = ScoringWeights::default();
        weights.title.exact = 5.0;
        weights.max_score = 0.0;
        assert_eq!(weights.problems().len(), 2);
    }
}
