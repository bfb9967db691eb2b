// Typed oracle output records.
//
// The oracle replies with JSON the model composed; every field here is
// defaulted so a sparse reply still parses, unknown enum values collapse to
// a safe variant, and confidences are clamped to [0, 1] by `normalise`.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

// ── Enums ───────────────────────────────────────────────────────────

/// Kind of change a pull request or commit batch represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeType {
    Feature,
    Bugfix,
    Refactor,
    Docs,
    Test,
    Security,
    Performance,
    Architecture,
    #[default]
    Unknown,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Refactor => "refactor",
            Self::Docs => "docs",
            Self::Test => "test",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Architecture => "architecture",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a value from the oracle; anything unrecognised collapses to
    /// `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "feature" => Self::Feature,
            "bugfix" => Self::Bugfix,
            "refactor" => Self::Refactor,
            "docs" => Self::Docs,
            "test" => Self::Test,
            "security" => Self::Security,
            "performance" => Self::Performance,
            "architecture" => Self::Architecture,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for ChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChangeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// How widely a change is felt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImpactLevel {
    Major,
    #[default]
    Minor,
    Patch,
}

impl ImpactLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        }
    }

    /// Unrecognised values collapse to `Minor`.
    pub fn parse(s: &str) -> Self {
        match s {
            "major" => Self::Major,
            "minor" => Self::Minor,
            "patch" => Self::Patch,
            _ => Self::Minor,
        }
    }
}

impl Serialize for ImpactLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImpactLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Priority of an engineering task item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Case-insensitive; unrecognised values collapse to `Medium`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl Serialize for TaskPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

// ── Repository analysis ─────────────────────────────────────────────

/// Full structured analysis of a repository, consumed by the materialiser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoAnalysis {
    pub overview: Overview,
    pub scope: Scope,
    pub architecture: Architecture,
    pub key_concepts: Vec<KeyConcept>,
    pub core_modules: Vec<CoreModule>,
    #[serde(rename = "publicAPIs")]
    pub public_apis: Vec<InterfaceDoc>,
    pub internal_interfaces: Vec<InterfaceDoc>,
    pub technical_stack: TechnicalStack,
    pub open_questions: Vec<String>,
    #[serde(rename = "initialADR")]
    pub initial_adr: InitialAdr,
    pub engineering_tasks: Vec<EngineeringTask>,
    pub confidence: f64,
}

impl RepoAnalysis {
    /// Clamp every confidence to [0, 1]. Called once after parsing so the
    /// oracle can never leak values outside the unit interval.
    pub fn normalise(&mut self) {
        self.confidence = clamp_unit(self.confidence);
        self.architecture.confidence = clamp_unit(self.architecture.confidence);
        for module in &mut self.core_modules {
            module.confidence = clamp_unit(module.confidence);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Overview {
    pub project_name: String,
    pub tagline: String,
    pub description: String,
    pub problem_statement: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Scope {
    pub in_scope: Vec<String>,
    pub out_of_scope: Vec<String>,
    pub future_considerations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Architecture {
    pub pattern: String,
    pub description: String,
    pub layers: Vec<ArchitectureLayer>,
    pub data_flow: String,
    pub frameworks: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchitectureLayer {
    pub name: String,
    pub purpose: String,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyConcept {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreModule {
    pub name: String,
    pub purpose: String,
    pub responsibilities: Vec<String>,
    pub location: String,
    pub dependencies: Vec<String>,
    pub key_files: Vec<String>,
    pub confidence: f64,
}

/// A documented API or internal interface surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceDoc {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TechnicalStack {
    pub frontend: Vec<String>,
    pub backend: Vec<String>,
    pub database: Vec<String>,
    pub infrastructure: Vec<String>,
    pub tooling: Vec<String>,
}

impl TechnicalStack {
    /// Flattened, deduplicated list of every named technology.
    pub fn all(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for group in [
            &self.frontend,
            &self.backend,
            &self.database,
            &self.infrastructure,
            &self.tooling,
        ] {
            for entry in group {
                if !seen.contains(&entry.as_str()) {
                    seen.push(entry.as_str());
                }
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InitialAdr {
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: AdrConsequences,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AdrConsequences {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineeringTask {
    pub task: String,
    pub priority: TaskPriority,
    pub category: String,
    pub reasoning: String,
}

// ── Change analysis ─────────────────────────────────────────────────

/// Oracle classification of one merged pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeAnalysis {
    pub change_type: ChangeType,
    pub impact_level: ImpactLevel,
    pub affected_modules: Vec<String>,
    #[serde(rename = "publicAPIChanges")]
    pub public_api_changes: bool,
    pub breaking_changes: bool,
    #[serde(rename = "requiresADR")]
    pub requires_adr: bool,
    pub summary: String,
    pub documentation_updates: Vec<String>,
    pub follow_up_tasks: Vec<String>,
    pub new_technologies: Vec<String>,
    pub architecture_changes: Option<String>,
    pub confidence: f64,
}

impl ChangeAnalysis {
    pub fn normalise(&mut self) {
        self.confidence = clamp_unit(self.confidence);
    }

    /// A change earns a release-notes item when it is major, breaking, or a
    /// feature that touches the public API.
    pub fn release_note_worthy(&self) -> bool {
        self.impact_level == ImpactLevel::Major
            || self.breaking_changes
            || (self.change_type == ChangeType::Feature && self.public_api_changes)
    }

    pub fn adr_worthy(&self) -> bool {
        self.requires_adr
    }

    pub fn tasks_worthy(&self) -> bool {
        !self.follow_up_tasks.is_empty()
    }
}

/// Oracle judgement over a batch of direct-branch commits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitSignificance {
    pub is_significant: bool,
    pub change_type: ChangeType,
    pub impact_level: ImpactLevel,
    pub summary: String,
    pub suggested_tasks: Vec<String>,
    pub confidence: f64,
}

impl CommitSignificance {
    pub fn normalise(&mut self) {
        self.confidence = clamp_unit(self.confidence);
    }
}
