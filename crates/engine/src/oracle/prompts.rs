// Prompt construction for the three oracle operations.
//
// Each prompt ends with an explicit field contract and a JSON-only
// instruction; the reply still goes through extraction and repair before
// parsing.

use crate::github::types::{CommitFile, CommitSummary, PrData, RepoSignals};
use engram_common::types::RepoKey;

pub const REPO_SYSTEM_PROMPT: &str = "You are a senior software architect documenting a \
    repository. Analyse the provided signals and respond with a single JSON object only, \
    no prose, no code fences.";

pub const PR_SYSTEM_PROMPT: &str = "You classify merged pull requests for engineering \
    documentation. Respond with a single JSON object only, no prose, no code fences.";

pub const COMMIT_SYSTEM_PROMPT: &str = "You judge whether a batch of direct commits is \
    significant enough to document. Respond with a single JSON object only, no prose, \
    no code fences.";

const MAX_TREE_ENTRIES: usize = 200;
const MAX_README_CHARS: usize = 4000;
const MAX_MANIFEST_CHARS: usize = 2000;
const MAX_PATCH_CHARS: usize = 1500;
const MAX_PR_FILES: usize = 30;
const MAX_DISCUSSION_ENTRIES: usize = 10;

fn truncated(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Prompt for the full repository analysis.
pub fn build_repo_prompt(repo_key: &RepoKey, signals: &RepoSignals) -> String {
    let mut prompt = format!("Repository: {repo_key}\n\n");

    if !signals.languages.is_empty() {
        prompt.push_str("Languages (bytes):\n");
        for (language, bytes) in &signals.languages {
            prompt.push_str(&format!("  {language}: {bytes}\n"));
        }
        prompt.push('\n');
    }

    if !signals.file_tree.is_empty() {
        prompt.push_str(&format!(
            "File tree ({} files, first {}):\n",
            signals.file_tree.len(),
            signals.file_tree.len().min(MAX_TREE_ENTRIES)
        ));
        for entry in signals.file_tree.iter().take(MAX_TREE_ENTRIES) {
            prompt.push_str(&format!("  {} ({} bytes)\n", entry.path, entry.size));
        }
        prompt.push('\n');
    }

    for (ecosystem, manifest) in &signals.package_manifests {
        prompt.push_str(&format!("Manifest ({ecosystem}):\n"));
        prompt.push_str(truncated(manifest, MAX_MANIFEST_CHARS));
        prompt.push_str("\n\n");
    }

    if let Some(readme) = &signals.readme {
        prompt.push_str("README:\n");
        prompt.push_str(truncated(readme, MAX_README_CHARS));
        prompt.push_str("\n\n");
    }

    if !signals.open_issues.is_empty() {
        prompt.push_str("Open issues:\n");
        for issue in signals.open_issues.iter().take(20) {
            prompt.push_str(&format!("  #{} {}\n", issue.number, issue.title));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Respond with JSON containing: overview{projectName, tagline, description, \
         problemStatement}, scope{inScope[], outOfScope[], futureConsiderations[]}, \
         architecture{pattern, description, layers[{name, purpose, technologies[]}], \
         dataFlow, frameworks[], confidence}, keyConcepts[{term, definition}], \
         coreModules[{name, purpose, responsibilities[], location, dependencies[], \
         keyFiles[], confidence}], publicAPIs[{name, description}], \
         internalInterfaces[{name, description}], technicalStack{frontend[], backend[], \
         database[], infrastructure[], tooling[]}, openQuestions[], initialADR{title, \
         context, decision, consequences{positive[], negative[], risks[]}}, \
         engineeringTasks[{task, priority, category, reasoning}], confidence. \
         Priorities are High, Medium or Low. Confidence values are between 0 and 1.",
    );
    prompt
}

/// Prompt classifying one merged pull request.
pub fn build_pr_prompt(pr: &PrData) -> String {
    let mut prompt = format!(
        "Merged pull request #{} into {}\nTitle: {}\nAuthor: {}\n\n",
        pr.number, pr.base_ref, pr.title, pr.author
    );

    if !pr.body.is_empty() {
        prompt.push_str("Description:\n");
        prompt.push_str(truncated(&pr.body, 2000));
        prompt.push_str("\n\n");
    }

    if !pr.files_changed.is_empty() {
        prompt.push_str(&format!("Changed files ({} total):\n", pr.files_changed.len()));
        let mut patch_budget = MAX_PATCH_CHARS;
        for file in pr.files_changed.iter().take(MAX_PR_FILES) {
            prompt.push_str(&format!(
                "  {} (+{} -{})\n",
                file.filename, file.additions, file.deletions
            ));
            if patch_budget > 0 {
                if let Some(patch) = &file.patch {
                    let excerpt = truncated(patch, patch_budget);
                    patch_budget = patch_budget.saturating_sub(excerpt.chars().count());
                    prompt.push_str(excerpt);
                    prompt.push('\n');
                }
            }
        }
        prompt.push('\n');
    }

    if !pr.comments.is_empty() {
        prompt.push_str("Discussion:\n");
        for comment in pr.comments.iter().take(MAX_DISCUSSION_ENTRIES) {
            prompt.push_str(&format!("  - {}\n", truncated(comment, 300)));
        }
        prompt.push('\n');
    }

    if !pr.reviews.is_empty() {
        prompt.push_str("Reviews:\n");
        for review in pr.reviews.iter().take(MAX_DISCUSSION_ENTRIES) {
            prompt.push_str(&format!(
                "  - {} ({}): {}\n",
                review.author,
                review.state,
                truncated(&review.body, 300)
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Respond with JSON containing: changeType (feature|bugfix|refactor|docs|test|\
         security|performance|architecture|unknown), impactLevel (major|minor|patch), \
         affectedModules[], publicAPIChanges (bool), breakingChanges (bool), requiresADR \
         (bool), summary, documentationUpdates[], followUpTasks[], newTechnologies[], \
         architectureChanges (string or null), confidence (0..1).",
    );
    prompt
}

/// Prompt judging the significance of a direct-commit batch.
pub fn build_commits_prompt(commits: &[CommitSummary], newest_files: &[CommitFile]) -> String {
    let mut prompt = format!("Direct commits to the default branch ({}):\n", commits.len());
    for commit in commits {
        let first_line = commit.message.lines().next().unwrap_or_default();
        prompt.push_str(&format!(
            "  {} {} ({}, {})\n",
            &commit.sha[..commit.sha.len().min(8)],
            first_line,
            commit.author,
            commit.date.format("%Y-%m-%d")
        ));
    }

    if !newest_files.is_empty() {
        prompt.push_str("\nFiles in the newest commit:\n");
        for file in newest_files.iter().take(MAX_PR_FILES) {
            prompt.push_str(&format!(
                "  {} (+{} -{})\n",
                file.filename, file.additions, file.deletions
            ));
        }
    }

    prompt.push_str(
        "\nRespond with JSON containing: isSignificant (bool), changeType (feature|bugfix|\
         refactor|docs|test|security|performance|architecture|unknown), impactLevel \
         (major|minor|patch), summary, suggestedTasks[], confidence (0..1). Routine \
         maintenance, formatting and dependency bumps are not significant.",
    );
    prompt
}
