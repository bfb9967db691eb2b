// One-shot materialisation of the Engineering Brain.
//
// Idempotent by repo key: the store is checked first, then the workspace
// itself (the ground truth) before anything is created. Partial progress is
// persisted so a failed run resumes instead of duplicating documents.

pub mod collections;
pub mod render;

use std::sync::Arc;

use chrono::Utc;
use engram_common::analysis::RepoAnalysis;
use engram_common::types::{
    CollectionIds, ConnectionRecord, Credential, OwnerUser, RepoKey,
};
use tracing::{info, warn};

use crate::github::{types::RepoSignals, GithubClient};
use crate::oracle::{degraded_repo_analysis, Oracle};
use crate::store::{ConnectionStore, StoreError};
use crate::workspace::{PagePosition, WorkspaceClient, WorkspaceError};

use collections::CollectionKind;

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum MaterialiseError {
    Workspace(WorkspaceError),
    Store(StoreError),
}

impl std::fmt::Display for MaterialiseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workspace(error) => write!(f, "materialisation workspace failure: {error}"),
            Self::Store(error) => write!(f, "materialisation store failure: {error}"),
        }
    }
}

impl std::error::Error for MaterialiseError {}

impl From<WorkspaceError> for MaterialiseError {
    fn from(error: WorkspaceError) -> Self {
        Self::Workspace(error)
    }
}

impl From<StoreError> for MaterialiseError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

// ── Contract ───────────────────────────────────────────────────────

/// Everything needed to materialise one repository.
#[derive(Debug, Clone)]
pub struct MaterialiseRequest {
    pub repo_key: RepoKey,
    pub credential: Credential,
    pub workspace_endpoint: String,
    pub branch: String,
    pub owner_user: OwnerUser,
}

/// Outcome of `analyse`.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialiseResult {
    /// The brain already exists; nothing was created.
    Existing { document_id: String, title: String, confidence: f64 },
    /// A fresh brain was created end to end.
    Created {
        document_id: String,
        title: String,
        collection_ids: CollectionIds,
        confidence: f64,
        tech_stack: Vec<String>,
    },
}

// ── Materialiser ───────────────────────────────────────────────────

pub struct Materialiser {
    store: ConnectionStore,
    oracle: Arc<dyn Oracle>,
    github_api_url: String,
}

impl Materialiser {
    pub fn new(store: ConnectionStore, oracle: Arc<dyn Oracle>, github_api_url: String) -> Self {
        Self { store, oracle, github_api_url }
    }

    /// Run the materialisation pipeline for one repository.
    pub async fn analyse(
        &self,
        request: MaterialiseRequest,
    ) -> Result<MaterialiseResult, MaterialiseError> {
        let title = request.repo_key.document_title();

        // Idempotence gate: store first, then the workspace as ground truth.
        if let Some(record) = self.store.get(&request.repo_key) {
            if let Some(document_id) = record.document_id {
                return Ok(MaterialiseResult::Existing {
                    document_id,
                    title: record.document_title,
                    confidence: record.confidence,
                });
            }
        }

        let workspace = WorkspaceClient::new(&request.workspace_endpoint);
        if let Some(existing) = workspace.document_exists(&title).await? {
            // Someone materialised this brain before we had a record of it;
            // hydrate one. Collection ids are unknown until re-created, so
            // targeted collection inserts are skipped for this connection.
            let mut record = ConnectionRecord::new(
                request.repo_key.clone(),
                request.credential.clone(),
                request.workspace_endpoint.clone(),
                request.owner_user.clone(),
                Utc::now(),
            );
            record.document_id = Some(existing.id.clone());
            self.store.put(record)?;
            info!(repo_key = %request.repo_key, document_id = %existing.id, "hydrated existing brain");
            return Ok(MaterialiseResult::Existing {
                document_id: existing.id,
                title: existing.title,
                confidence: 0.0,
            });
        }

        // Gather signals best-effort and ask the oracle.
        let github = GithubClient::with_api_url(request.credential.clone(), &self.github_api_url);
        let signals = self.gather_signals(&github, &request).await;
        let analysis = match self
            .oracle
            .analyse_repository(request.repo_key.clone(), signals)
            .await
        {
            Ok(analysis) => analysis,
            Err(error) => {
                warn!(repo_key = %request.repo_key, %error, "repository analysis degraded");
                degraded_repo_analysis(&request.repo_key)
            }
        };

        // Create the root document, then seed it. A failure after this
        // point persists the partial record so the retry short-circuits.
        let document_id = workspace.documents_create(&title).await?;
        let mut record = ConnectionRecord::new(
            request.repo_key.clone(),
            request.credential.clone(),
            request.workspace_endpoint.clone(),
            request.owner_user.clone(),
            Utc::now(),
        );
        record.document_id = Some(document_id.clone());
        record.confidence = analysis.confidence;

        match self.seed_document(&workspace, &document_id, &analysis, &mut record).await {
            Ok(()) => {}
            Err(error) => {
                warn!(repo_key = %request.repo_key, %error, "seeding failed, persisting partial record");
                self.store.put(record)?;
                return Err(error.into());
            }
        }

        self.store.put(record.clone())?;
        info!(
            repo_key = %request.repo_key,
            document_id = %document_id,
            confidence = analysis.confidence,
            "engineering brain materialised"
        );

        Ok(MaterialiseResult::Created {
            document_id,
            title,
            collection_ids: record.collection_ids,
            confidence: analysis.confidence,
            tech_stack: analysis
                .technical_stack
                .all()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    /// Best-effort signal gathering: each provider call degrades to an
    /// empty value with a warning. The signal set is never fatal.
    async fn gather_signals(
        &self,
        github: &GithubClient,
        request: &MaterialiseRequest,
    ) -> RepoSignals {
        let owner = request.repo_key.owner();
        let name = request.repo_key.name();
        let mut signals = RepoSignals::default();

        match github.list_tree(owner, name, &request.branch).await {
            Ok(tree) => signals.file_tree = tree,
            Err(error) => warn!(repo_key = %request.repo_key, %error, "tree listing unavailable"),
        }
        match github.get_readme(owner, name).await {
            Ok(readme) => signals.readme = readme,
            Err(error) => warn!(repo_key = %request.repo_key, %error, "readme unavailable"),
        }
        match github.get_package_manifests(owner, name).await {
            Ok(manifests) => signals.package_manifests = manifests,
            Err(error) => warn!(repo_key = %request.repo_key, %error, "manifests unavailable"),
        }
        match github.get_languages(owner, name).await {
            Ok(languages) => signals.languages = languages,
            Err(error) => warn!(repo_key = %request.repo_key, %error, "languages unavailable"),
        }
        match github.get_open_issues(owner, name).await {
            Ok(issues) => signals.open_issues = issues,
            Err(error) => warn!(repo_key = %request.repo_key, %error, "open issues unavailable"),
        }

        signals
    }

    /// Seed the main page, append the technical specification, then create
    /// and seed the four collections in order.
    async fn seed_document(
        &self,
        workspace: &WorkspaceClient,
        document_id: &str,
        analysis: &RepoAnalysis,
        record: &mut ConnectionRecord,
    ) -> Result<(), WorkspaceError> {
        let now = Utc::now();

        let header = render::main_page_markdown(&record.repo_key, analysis);
        workspace.markdown_add(document_id, &header, PagePosition::Start).await?;

        let spec = render::tech_spec_markdown(analysis);
        workspace.markdown_add(document_id, &spec, PagePosition::End).await?;

        for kind in CollectionKind::ORDER {
            let collection_id = workspace
                .collections_create(document_id, kind.name(), kind.schema())
                .await?;
            match kind {
                CollectionKind::ReleaseNotes => {
                    record.collection_ids.release_notes = Some(collection_id.clone());
                }
                CollectionKind::Adrs => {
                    record.collection_ids.adrs = Some(collection_id.clone());
                }
                CollectionKind::EngineeringTasks => {
                    record.collection_ids.engineering_tasks = Some(collection_id.clone());
                }
                CollectionKind::DocHistory => {
                    record.collection_ids.doc_history = Some(collection_id.clone());
                }
            }
            let items = collections::seed_items(kind, analysis, now);
            workspace.collection_items_add(&collection_id, items).await?;
        }

        Ok(())
    }
}
