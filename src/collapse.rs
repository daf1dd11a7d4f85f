// src/collapse.rs
//
// Temporal collapse of each feature series and the combined quality score.
//
// The per-feature rules and the score weights below are the published general
// model's values as documented, not values verified against a reference run.
// Both are plain data so callers can replace them.
//
// Clip bounds are applied literally, so an unimpaired video collapses to the
// floors (chroma_spread 0.6, si_gain 0.004, hv_loss 0.06) and scores about
// 0.038 rather than 0.

use crate::error::{Result, VqmError};
use crate::pooling::{mean, sort_ascending, std_dev};
use crate::series::{Feature, FeatureSeries};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Mean,
    StdDev,
    /// Value at the given percent level of the ascending sort.
    Percentile(f64),
}

/// Reduce, then optionally square, then clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollapseRule {
    pub reduce: Reduction,
    #[serde(default)]
    pub square: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_max: Option<f64>,
}

impl CollapseRule {
    pub fn new(reduce: Reduction) -> Self {
        Self {
            reduce,
            square: false,
            clip_min: None,
            clip_max: None,
        }
    }

    pub fn squared(mut self) -> Self {
        self.square = true;
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.clip_min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.clip_max = Some(max);
        self
    }

    /// `None` when there is nothing to collapse.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut v = match self.reduce {
            Reduction::Mean => mean(values),
            Reduction::StdDev => std_dev(values),
            Reduction::Percentile(level) => percentile(values, level),
        };
        if self.square {
            v *= v;
        }
        if let Some(min) = self.clip_min {
            v = v.max(min);
        }
        if let Some(max) = self.clip_max {
            v = v.min(max);
        }
        Some(v)
    }
}

/// Sorted value at index `floor(level / 100 * n)`, clamped to the last value.
pub fn percentile(values: &[f64], level: f64) -> f64 {
    let mut sorted = values.to_vec();
    sort_ascending(&mut sorted);
    let index = ((level / 100.0 * sorted.len() as f64) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// One collapsed value per feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureValues(BTreeMap<Feature, f64>);

impl FeatureValues {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.0.get(&feature).copied()
    }

    pub fn insert(&mut self, feature: Feature, value: f64) {
        self.0.insert(feature, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollapsePolicy {
    rules: BTreeMap<Feature, CollapseRule>,
}

impl Default for CollapsePolicy {
    fn default() -> Self {
        let rules = BTreeMap::from([
            (
                Feature::ChromaSpread,
                CollapseRule::new(Reduction::Percentile(10.0)).with_min(0.6),
            ),
            (Feature::ChromaExtreme, CollapseRule::new(Reduction::StdDev)),
            (Feature::SiLoss, CollapseRule::new(Reduction::Percentile(10.0))),
            (
                Feature::SiGain,
                CollapseRule::new(Reduction::Mean).with_min(0.004).with_max(0.14),
            ),
            (
                Feature::HvLoss,
                CollapseRule::new(Reduction::Mean).squared().with_min(0.06),
            ),
            (Feature::HvGain, CollapseRule::new(Reduction::Mean)),
            (Feature::CtAtiGain, CollapseRule::new(Reduction::Percentile(10.0))),
        ]);
        Self { rules }
    }
}

impl CollapsePolicy {
    /// Unlisted features fall back to a plain mean.
    pub fn rule(&self, feature: Feature) -> CollapseRule {
        self.rules
            .get(&feature)
            .copied()
            .unwrap_or(CollapseRule::new(Reduction::Mean))
    }

    pub fn set(&mut self, feature: Feature, rule: CollapseRule) {
        self.rules.insert(feature, rule);
    }

    pub fn collapse(&self, series: &FeatureSeries) -> Result<FeatureValues> {
        let mut values = FeatureValues::default();
        for feature in Feature::ALL {
            let rule = self.rule(feature);
            let v = rule
                .apply(series.series(feature))
                .ok_or_else(|| VqmError::EmptySeries(feature.to_string()))?;
            debug!("Collapsed {} with {:?}: {}", feature, rule, v);
            values.insert(feature, v);
        }
        Ok(values)
    }
}

/// Linear combination of collapsed features followed by range shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreModel {
    pub weights: BTreeMap<Feature, f64>,
    /// Scores above 1 are compressed with `(1 + c)x / (c + x)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crush: Option<f64>,
}

impl Default for ScoreModel {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (Feature::SiLoss, -0.2097),
            (Feature::HvLoss, 0.5969),
            (Feature::HvGain, 0.2483),
            (Feature::ChromaSpread, 0.0192),
            (Feature::SiGain, -2.3416),
            (Feature::CtAtiGain, 0.0431),
            (Feature::ChromaExtreme, 0.0076),
        ]);
        Self {
            weights,
            crush: Some(0.5),
        }
    }
}

impl ScoreModel {
    pub fn score(&self, values: &FeatureValues) -> f64 {
        let raw: f64 = self
            .weights
            .iter()
            .map(|(f, w)| w * values.get(*f).unwrap_or(0.0))
            .sum();
        if raw < 0.0 {
            0.0
        } else if raw > 1.0 {
            match self.crush {
                Some(c) => (1.0 + c) * raw / (c + raw),
                None => raw,
            }
        } else {
            raw
        }
    }
}

/// On-disk form of a policy: any subset of rules plus an optional score model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub collapse: BTreeMap<Feature, CollapseRule>,
    #[serde(default)]
    pub score: Option<ScoreModel>,
}

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn apply_to(self, policy: &mut CollapsePolicy, model: &mut ScoreModel) {
        for (feature, rule) in self.collapse {
            policy.set(feature, rule);
        }
        if let Some(score) = self.score {
            *model = score;
        }
    }
}

static RULE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<feature>[a-z_]+)\s*=\s*(?P<tokens>\S.*?)\s*$").expect("Invalid rule Regex")
});

static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<mean>mean)|(?P<std>std)|p(?P<pct>[0-9]+(?:\.[0-9]*)?)|(?P<square>square)|min:(?P<min>-?[0-9]+(?:\.[0-9]*)?)|max:(?P<max>-?[0-9]+(?:\.[0-9]*)?))$",
    )
    .expect("Invalid rule token Regex")
});

/// A `feature=token,token,...` override from the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleOverride {
    pub feature: Feature,
    pub rule: CollapseRule,
}

impl FromStr for RuleOverride {
    type Err = VqmError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = RULE_REGEX
            .captures(s)
            .ok_or_else(|| VqmError::Parse(format!("Invalid collapse rule '{}', expected feature=tokens", s)))?;
        let feature: Feature = caps["feature"].parse()?;

        let parse_num = |t: &str| -> Result<f64> {
            t.parse::<f64>()
                .map_err(|_| VqmError::Parse(format!("Invalid number in collapse rule: {}", t)))
        };

        let mut reduce = None;
        let mut rule = CollapseRule::new(Reduction::Mean);
        for token in caps["tokens"].split(',').map(str::trim) {
            let t = TOKEN_REGEX
                .captures(token)
                .ok_or_else(|| VqmError::Parse(format!("Unknown collapse token '{}' in '{}'", token, s)))?;
            let next = if t.name("mean").is_some() {
                Some(Reduction::Mean)
            } else if t.name("std").is_some() {
                Some(Reduction::StdDev)
            } else if let Some(p) = t.name("pct") {
                let level = parse_num(p.as_str())?;
                if level > 100.0 {
                    return Err(VqmError::Parse(format!("Percentile level {} exceeds 100", level)));
                }
                Some(Reduction::Percentile(level))
            } else {
                if t.name("square").is_some() {
                    rule.square = true;
                } else if let Some(m) = t.name("min") {
                    rule.clip_min = Some(parse_num(m.as_str())?);
                } else if let Some(m) = t.name("max") {
                    rule.clip_max = Some(parse_num(m.as_str())?);
                }
                None
            };
            if let Some(r) = next {
                if reduce.replace(r).is_some() {
                    return Err(VqmError::Parse(format!("More than one reduction in '{}'", s)));
                }
            }
        }
        rule.reduce = reduce.unwrap_or(Reduction::Mean);
        Ok(RuleOverride { feature, rule })
    }
}
