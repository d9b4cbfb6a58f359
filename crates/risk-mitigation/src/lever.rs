//! Lever catalog: the controllable project attributes behind the risk score
//!
//! Each lever is an ordinally encoded attribute with a closed value domain.
//! The catalog keeps insertion order, which is also the order of the
//! attribute vector sent to the scorer.

use crate::error::{MitigationError, MitigationResult};
use crate::profile::{CategoryVector, CATEGORY_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Ordinal attribute vector, one entry per lever in catalog order
pub type AttributeVector = Vec<i64>;

/// Stable lever identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeverId(String);

impl LeverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LeverId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Logical security domain a lever belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeverFamily {
    Project,
    Organization,
    Authentication,
    Network,
    Governance,
    Training,
    Operations,
}

/// One value in a lever's domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeverValue {
    /// Stable key used in applied changes and snapshots
    pub key: String,
    /// Display label
    pub label: String,
    /// Risk rank, 0 is the safest
    pub risk_rank: u32,
}

/// A discrete-valued project attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lever {
    /// Stable identifier
    pub id: LeverId,
    /// Assessment form attribute code
    pub code: String,
    /// Display name
    pub name: String,
    /// What moving toward the recommendation involves
    pub description: String,
    /// Security domain
    pub family: LeverFamily,
    /// Tie-break weight, higher ranks first
    pub importance: f64,
    /// Maximum relative reduction per category when moving from the riskiest
    /// to the safest value
    pub exposure: CategoryVector,
    domain: Vec<LeverValue>,
    current: usize,
    recommended: usize,
    changeable: bool,
}

impl Lever {
    pub fn builder(id: impl Into<String>, name: impl Into<String>, family: LeverFamily) -> LeverBuilder {
        LeverBuilder {
            id: LeverId::new(id),
            code: String::new(),
            name: name.into(),
            description: String::new(),
            family,
            importance: 0.5,
            exposure: [0.0; CATEGORY_COUNT],
            domain: vec![],
            current: None,
            recommended: None,
            changeable: true,
        }
    }

    pub fn domain(&self) -> &[LeverValue] {
        &self.domain
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn recommended_index(&self) -> usize {
        self.recommended
    }

    pub fn current_value(&self) -> &LeverValue {
        &self.domain[self.current]
    }

    pub fn recommended_value(&self) -> &LeverValue {
        &self.domain[self.recommended]
    }

    pub fn is_changeable(&self) -> bool {
        self.changeable
    }

    pub fn is_at_recommendation(&self) -> bool {
        self.current == self.recommended
    }

    /// Position of a value key in the domain
    pub fn position_of(&self, key: &str) -> Option<usize> {
        self.domain.iter().position(|value| value.key == key)
    }

    pub fn value(&self, index: usize) -> Option<&LeverValue> {
        self.domain.get(index)
    }

    /// Highest risk rank in the domain
    pub fn max_rank(&self) -> u32 {
        self.domain.iter().map(|v| v.risk_rank).max().unwrap_or(0)
    }

    /// Inclusive encoding range accepted by the scorer
    pub fn encoding_range(&self) -> (i64, i64) {
        (0, self.domain.len() as i64 - 1)
    }

    fn set_current(&mut self, key: &str) -> MitigationResult<bool> {
        let index = self.position_of(key).ok_or_else(|| {
            MitigationError::validation(self.id.as_str(), format!("'{key}' is not a valid value"))
        })?;
        let changed = index != self.current;
        self.current = index;
        Ok(changed)
    }
}

/// Builder for [`Lever`]
#[derive(Debug, Clone)]
pub struct LeverBuilder {
    id: LeverId,
    code: String,
    name: String,
    description: String,
    family: LeverFamily,
    importance: f64,
    exposure: CategoryVector,
    domain: Vec<LeverValue>,
    current: Option<String>,
    recommended: Option<String>,
    changeable: bool,
}

impl LeverBuilder {
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn value(mut self, key: impl Into<String>, label: impl Into<String>, risk_rank: u32) -> Self {
        self.domain.push(LeverValue {
            key: key.into(),
            label: label.into(),
            risk_rank,
        });
        self
    }

    pub fn current(mut self, key: impl Into<String>) -> Self {
        self.current = Some(key.into());
        self
    }

    /// Override the recommendation; defaults to the safest value
    pub fn recommended(mut self, key: impl Into<String>) -> Self {
        self.recommended = Some(key.into());
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn exposure(mut self, exposure: CategoryVector) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn changeable(mut self, changeable: bool) -> Self {
        self.changeable = changeable;
        self
    }

    pub fn build(self) -> MitigationResult<Lever> {
        let field = self.id.as_str().to_string();
        if self.domain.is_empty() {
            return Err(MitigationError::validation(&field, "value domain is empty"));
        }

        let mut keys = HashSet::new();
        for value in &self.domain {
            if !keys.insert(value.key.as_str()) {
                return Err(MitigationError::validation(
                    &field,
                    format!("duplicate value '{}'", value.key),
                ));
            }
        }

        if !self.importance.is_finite() || self.importance < 0.0 {
            return Err(MitigationError::validation(&field, "importance must be non-negative"));
        }
        if self
            .exposure
            .iter()
            .any(|e| !e.is_finite() || !(0.0..=1.0).contains(e))
        {
            return Err(MitigationError::validation(&field, "exposure must lie in [0, 1]"));
        }

        let lookup = |key: &str| {
            self.domain
                .iter()
                .position(|v| v.key == key)
                .ok_or_else(|| {
                    MitigationError::validation(
                        self.id.as_str(),
                        format!("'{key}' is not in the value domain"),
                    )
                })
        };

        let current = match &self.current {
            Some(key) => lookup(key)?,
            None => 0,
        };
        let recommended = match &self.recommended {
            Some(key) => lookup(key)?,
            // First value with the lowest rank
            None => self
                .domain
                .iter()
                .enumerate()
                .min_by_key(|(index, value)| (value.risk_rank, *index))
                .map(|(index, _)| index)
                .unwrap_or(0),
        };

        Ok(Lever {
            id: self.id,
            code: self.code,
            name: self.name,
            description: self.description,
            family: self.family,
            importance: self.importance,
            exposure: self.exposure,
            domain: self.domain,
            current,
            recommended,
            changeable: self.changeable,
        })
    }
}

/// Ordered registry of levers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeverCatalog {
    levers: Vec<Lever>,
}

impl LeverCatalog {
    /// Create a catalog; lever ids must be unique
    pub fn new(levers: Vec<Lever>) -> MitigationResult<Self> {
        let mut seen = HashSet::new();
        for lever in &levers {
            if !seen.insert(lever.id.clone()) {
                return Err(MitigationError::validation(
                    "catalog",
                    format!("duplicate lever id '{}'", lever.id),
                ));
            }
        }
        Ok(Self { levers })
    }

    pub fn levers(&self) -> &[Lever] {
        &self.levers
    }

    pub fn len(&self) -> usize {
        self.levers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levers.is_empty()
    }

    pub fn get(&self, id: &LeverId) -> Option<&Lever> {
        self.levers.iter().find(|lever| &lever.id == id)
    }

    pub fn contains(&self, id: &LeverId) -> bool {
        self.get(id).is_some()
    }

    /// Insertion position of a lever
    pub fn position(&self, id: &LeverId) -> Option<usize> {
        self.levers.iter().position(|lever| &lever.id == id)
    }

    fn get_mut(&mut self, id: &LeverId) -> MitigationResult<&mut Lever> {
        self.levers
            .iter_mut()
            .find(|lever| &lever.id == id)
            .ok_or_else(|| MitigationError::UnknownLever {
                lever_id: id.to_string(),
            })
    }

    /// Toggle changeability; returns whether the flag changed
    pub fn set_changeable(&mut self, id: &LeverId, changeable: bool) -> MitigationResult<bool> {
        let lever = self.get_mut(id)?;
        let changed = lever.changeable != changeable;
        lever.changeable = changeable;
        Ok(changed)
    }

    /// Set a lever's current value by key; returns whether it changed
    pub fn set_value(&mut self, id: &LeverId, key: &str) -> MitigationResult<bool> {
        self.get_mut(id)?.set_current(key)
    }

    /// Encode current values in catalog order
    pub fn encode(&self) -> AttributeVector {
        self.levers
            .iter()
            .map(|lever| lever.current as i64)
            .collect()
    }

    /// Encode current values with one lever moved to `index`
    pub fn encode_with(&self, id: &LeverId, index: usize) -> AttributeVector {
        self.levers
            .iter()
            .map(|lever| {
                if &lever.id == id {
                    index as i64
                } else {
                    lever.current as i64
                }
            })
            .collect()
    }

    /// Declared `[min, max]` of every attribute, in catalog order
    pub fn encoding_ranges(&self) -> Vec<(i64, i64)> {
        self.levers.iter().map(Lever::encoding_range).collect()
    }

    /// Overwrite current values from an encoded attribute vector
    pub fn apply_attribute_vector(&mut self, vector: &[i64]) -> MitigationResult<()> {
        validate_attribute_vector(vector, &self.encoding_ranges())?;
        for (lever, encoded) in self.levers.iter_mut().zip(vector) {
            lever.current = *encoded as usize;
        }
        Ok(())
    }

    /// Default catalog of the construction project assessment form
    pub fn construction_default() -> MitigationResult<Self> {
        Self::new(default_levers()?)
    }
}

/// Check length and per-attribute ranges of an attribute vector
pub fn validate_attribute_vector(vector: &[i64], ranges: &[(i64, i64)]) -> MitigationResult<()> {
    if vector.len() != ranges.len() {
        return Err(MitigationError::validation(
            "attribute_vector",
            format!("expected {} attributes, got {}", ranges.len(), vector.len()),
        ));
    }
    for (position, (value, (min, max))) in vector.iter().zip(ranges).enumerate() {
        if value < min || value > max {
            return Err(MitigationError::validation(
                format!("attribute_vector[{position}]"),
                format!("value {value} outside [{min}, {max}]"),
            ));
        }
    }
    Ok(())
}

fn team_count(
    id: &str,
    code: &str,
    name: &str,
    description: &str,
    importance: f64,
    current: &str,
) -> MitigationResult<Lever> {
    Lever::builder(id, name, LeverFamily::Organization)
        .code(code)
        .description(description)
        .value("<=10", "≤10", 0)
        .value("11-20", "11-20", 1)
        .value("21-30", "21-30", 2)
        .value("31-40", "31-40", 3)
        .value(">40", ">40", 4)
        .value("na", "N/A", 0)
        .current(current)
        .importance(importance)
        .exposure([0.05, 0.10, 0.05, 0.15, 0.20])
        .build()
}

fn percentage_band(builder: LeverBuilder, ascending_risk: bool) -> LeverBuilder {
    let bands = [
        ("<=20", "≤20%"),
        ("21-40", "21-40%"),
        ("41-60", "41-60%"),
        ("61-80", "61-80%"),
        ("81-100", "81-100%"),
    ];
    bands
        .iter()
        .enumerate()
        .fold(builder, |builder, (index, (key, label))| {
            let rank = if ascending_risk { index } else { bands.len() - 1 - index };
            builder.value(*key, *label, rank as u32)
        })
}

fn default_levers() -> MitigationResult<Vec<Lever>> {
    Ok(vec![
        Lever::builder("project-duration", "Project Duration", LeverFamily::Project)
            .code("1.1")
            .description("Balance project duration against the time needed to roll out security controls")
            .value("<=3m", "≤3 months", 0)
            .value("3-6m", "3-6 months", 1)
            .value("6-12m", "6-12 months", 2)
            .value("12-24m", "12-24 months", 3)
            .value(">24m", ">24 months", 4)
            .current("6-12m")
            .importance(0.2)
            .exposure([0.05; CATEGORY_COUNT])
            .changeable(false)
            .build()?,
        Lever::builder("project-type", "Project Type", LeverFamily::Project)
            .code("1.2")
            .description("Classify the project type so it matches its security requirements")
            .value("transportation", "Transportation", 3)
            .value("government", "Government", 4)
            .value("healthcare", "Healthcare", 4)
            .value("commercial", "Commercial", 2)
            .value("residential", "Residential", 1)
            .value("other", "Other", 2)
            .current("commercial")
            .importance(0.2)
            .exposure([0.05; CATEGORY_COUNT])
            .changeable(false)
            .build()?,
        Lever::builder("cyber-legal-team", "Cybersecurity Legal Team", LeverFamily::Governance)
            .code("1.3")
            .description("Set up a cybersecurity legal team to steer compliance and legal obligations")
            .value("yes", "Yes", 0)
            .value("no", "No", 2)
            .value("unsure", "Unsure", 1)
            .current("no")
            .importance(0.5)
            .exposure([0.10, 0.05, 0.15, 0.05, 0.10])
            .build()?,
        Lever::builder("company-scale", "Company Scale", LeverFamily::Project)
            .code("1.4")
            .description("Scale company resources to carry a full cybersecurity programme")
            .value("<=30", "≤30", 0)
            .value("31-60", "31-60", 1)
            .value("61-100", "61-100", 2)
            .value("101-150", "101-150", 3)
            .value(">150", ">150", 4)
            .current("31-60")
            .importance(0.2)
            .exposure([0.05; CATEGORY_COUNT])
            .changeable(false)
            .build()?,
        Lever::builder("project-phase", "Project Phase", LeverFamily::Project)
            .code("1.5")
            .description("Match security measures to the requirements of the current project phase")
            .value("planning", "Planning", 1)
            .value("design", "Design", 1)
            .value("construction", "Construction", 3)
            .value("maintenance", "Maintenance", 2)
            .value("demolition", "Demolition", 0)
            .current("construction")
            .importance(0.2)
            .exposure([0.05; CATEGORY_COUNT])
            .changeable(false)
            .build()?,
        team_count(
            "layer1-teams",
            "2.1.1",
            "Layer 1 Teams",
            "Grow the core project teams so security has dedicated owners",
            0.40,
            "11-20",
        )?,
        team_count(
            "layer2-teams",
            "2.1.2",
            "Layer 2 Teams",
            "Restructure secondary teams for tighter security coordination",
            0.35,
            "21-30",
        )?,
        team_count(
            "layer3-teams",
            "2.1.3",
            "Layer 3 Teams",
            "Rearrange tertiary teams to close gaps between security responsibilities",
            0.30,
            "21-30",
        )?,
        percentage_band(
            Lever::builder("team-overlap", "Team Overlap Percentage", LeverFamily::Organization)
                .code("2.2")
                .description("Cut team overlap to limit vulnerabilities shared across teams"),
            true,
        )
        .current("41-60")
        .importance(0.35)
        .exposure([0.05, 0.05, 0.10, 0.15, 0.15])
        .build()?,
        Lever::builder("it-team", "Dedicated IT Team", LeverFamily::Operations)
            .code("3.1")
            .description("Stand up a dedicated IT team for proactive security management")
            .value("yes", "Yes", 0)
            .value("no", "No", 2)
            .value("unsure", "Unsure", 1)
            .current("no")
            .importance(0.6)
            .exposure([0.20, 0.10, 0.15, 0.05, 0.05])
            .build()?,
        percentage_band(
            Lever::builder("firewall-coverage", "Devices with Firewall", LeverFamily::Network)
                .code("3.2")
                .description("Deploy firewalls on more of the project's devices"),
            false,
        )
        .current("21-40")
        .importance(0.7)
        .exposure([0.30, 0.05, 0.25, 0.05, 0.10])
        .build()?,
        Lever::builder("network-type", "Network Type", LeverFamily::Network)
            .code("3.3")
            .description("Move project traffic onto more secure network infrastructure")
            .value("public", "Public", 2)
            .value("private", "Private", 0)
            .value("both", "Both", 1)
            .current("both")
            .importance(0.6)
            .exposure([0.20, 0.05, 0.20, 0.05, 0.05])
            .build()?,
        percentage_band(
            Lever::builder("phishing-failure-rate", "Phishing Test Failure Rate", LeverFamily::Training)
                .code("3.4")
                .description("Step up security awareness training to lower phishing susceptibility"),
            true,
        )
        .current("41-60")
        .importance(0.8)
        .exposure([0.15, 0.40, 0.10, 0.05, 0.05])
        .build()?,
        Lever::builder("governance-level", "Governance Level", LeverFamily::Governance)
            .code("4.1")
            .description("Strengthen governance practices and commitment to cybersecurity policy")
            .value("level1", "Level 1", 4)
            .value("level2", "Level 2", 3)
            .value("level3", "Level 3", 2)
            .value("level4", "Level 4", 1)
            .value("level5", "Level 5", 0)
            .current("level2")
            .importance(0.6)
            .exposure([0.10, 0.10, 0.15, 0.20, 0.15])
            .build()?,
        Lever::builder("password-reuse", "Password Reuse Allowed", LeverFamily::Authentication)
            .code("4.2")
            .description("Enforce strict restrictions on password reuse")
            .value("yes", "Allowed", 1)
            .value("no", "Not Allowed", 0)
            .current("yes")
            .importance(0.5)
            .exposure([0.10, 0.20, 0.15, 0.10, 0.05])
            .build()?,
        Lever::builder("uses-mfa", "Multi-Factor Authentication", LeverFamily::Authentication)
            .code("4.3")
            .description("Roll out MFA on every project system and access point")
            .value("yes", "Yes", 0)
            .value("no", "No", 1)
            .current("no")
            .importance(0.9)
            .exposure([0.25, 0.30, 0.25, 0.10, 0.10])
            .build()?,
    ])
}
