// Schemas and seed items for the four Engineering Brain collections.
//
// The content-property key differs per collection (`title` vs `task` vs
// `event`); an item inserted under the wrong key is silently dropped by
// the workspace, so every insertion site goes through these helpers.

use chrono::{DateTime, Utc};
use engram_common::analysis::RepoAnalysis;
use serde_json::{json, Value};

/// The four collections, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    ReleaseNotes,
    Adrs,
    EngineeringTasks,
    DocHistory,
}

impl CollectionKind {
    pub const ORDER: [CollectionKind; 4] =
        [Self::ReleaseNotes, Self::Adrs, Self::EngineeringTasks, Self::DocHistory];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReleaseNotes => "release_notes",
            Self::Adrs => "adrs",
            Self::EngineeringTasks => "engineering_tasks",
            Self::DocHistory => "doc_history",
        }
    }

    /// The property key that carries an item's content.
    pub fn content_key(self) -> &'static str {
        match self {
            Self::ReleaseNotes | Self::Adrs => "title",
            Self::EngineeringTasks => "task",
            Self::DocHistory => "event",
        }
    }

    /// The typed schema sent to `collections_create`.
    pub fn schema(self) -> Value {
        match self {
            Self::ReleaseNotes => json!({
                "contentProperty": "title",
                "properties": [
                    {"name": "version", "type": "text"},
                    {"name": "date", "type": "date"},
                    {"name": "summary", "type": "text"},
                    {"name": "pr_number", "type": "number"},
                    {"name": "changes", "type": "text"}
                ]
            }),
            Self::Adrs => json!({
                "contentProperty": "title",
                "properties": [
                    {"name": "adr_id", "type": "text"},
                    {"name": "status", "type": "text"},
                    {"name": "date", "type": "date"},
                    {"name": "context", "type": "text"},
                    {"name": "decision", "type": "text"},
                    {"name": "consequences", "type": "text"},
                    {"name": "confidence", "type": "number"}
                ]
            }),
            Self::EngineeringTasks => json!({
                "contentProperty": "task",
                "properties": [
                    {"name": "priority", "type": "text"},
                    {"name": "category", "type": "text"},
                    {"name": "reasoning", "type": "text"},
                    {"name": "status", "type": "text"},
                    {"name": "created_at", "type": "date"}
                ]
            }),
            Self::DocHistory => json!({
                "contentProperty": "event",
                "properties": [
                    {"name": "date", "type": "date"},
                    {"name": "description", "type": "text"},
                    {"name": "pr_number", "type": "number"},
                    {"name": "confidence", "type": "text"}
                ]
            }),
        }
    }
}

/// Render a [0,1] confidence as the percentage string the history
/// collection stores (`"82%"`).
pub fn confidence_percent(confidence: f64) -> String {
    format!("{}%", (confidence.clamp(0.0, 1.0) * 100.0).round() as i64)
}

fn date_string(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// The seed items inserted right after a collection is created.
pub fn seed_items(kind: CollectionKind, analysis: &RepoAnalysis, now: DateTime<Utc>) -> Vec<Value> {
    let date = date_string(now);
    match kind {
        CollectionKind::ReleaseNotes => vec![json!({
            "title": "Initial documentation",
            "version": format!("v{}", now.format("%Y.%m.%d")),
            "date": date,
            "summary": "Engineering Brain created from repository analysis",
            "pr_number": 0,
            "changes": "Initial materialisation"
        })],
        CollectionKind::Adrs => {
            let adr = &analysis.initial_adr;
            let title = if adr.title.is_empty() {
                "Initial architecture decision".to_string()
            } else {
                adr.title.clone()
            };
            let consequences = [
                ("Positive", &adr.consequences.positive),
                ("Negative", &adr.consequences.negative),
                ("Risks", &adr.consequences.risks),
            ]
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(label, entries)| format!("{label}: {}", entries.join("; ")))
            .collect::<Vec<_>>()
            .join(" | ");
            vec![json!({
                "title": title,
                "adr_id": "ADR-0001",
                "status": "Accepted",
                "date": date,
                "context": adr.context,
                "decision": adr.decision,
                "consequences": consequences,
                "confidence": analysis.confidence
            })]
        }
        CollectionKind::EngineeringTasks => {
            if analysis.engineering_tasks.is_empty() {
                return vec![json!({
                    "task": "Review the generated Engineering Brain",
                    "priority": "Medium",
                    "category": "Documentation",
                    "reasoning": "No tasks were produced by the analysis",
                    "status": "Open",
                    "created_at": date
                })];
            }
            analysis
                .engineering_tasks
                .iter()
                .map(|task| {
                    json!({
                        "task": task.task,
                        "priority": task.priority.as_str(),
                        "category": task.category,
                        "reasoning": task.reasoning,
                        "status": "Open",
                        "created_at": date
                    })
                })
                .collect()
        }
        CollectionKind::DocHistory => vec![json!({
            "event": "Document created",
            "date": date,
            "description": "Initial Engineering Brain materialised from repository analysis",
            "pr_number": 0,
            "confidence": confidence_percent(analysis.confidence)
        })],
    }
}
