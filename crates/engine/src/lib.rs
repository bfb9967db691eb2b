// engram-engine: the state-owning sync engine.
//
// Component map:
//   github      — provider REST client (trees, PRs, commits)
//   workspace   — document-service tool-protocol client
//   oracle      — language-model analysis client with JSON repair
//   store       — durable repoKey → ConnectionRecord mapping
//   materialise — one-shot Engineering Brain creation pipeline
//   change      — targeted mutations for PRs and commit batches
//   sync        — the periodic scheduler that drives everything

pub mod change;
pub mod config;
pub mod github;
pub mod materialise;
pub mod oracle;
pub mod store;
pub mod sync;
pub mod workspace;
