//! Persists synchronous/asynchronous blocking questions and drives the
//! resume flow (spec.md §4.6).
//!
//! `BlockerStore` is a thin, typed front-end over [`PersistenceStore`]'s
//! blocker operations. It owns no state of its own beyond the store handle,
//! mirroring how the teacher's discord layer keeps orchestration logic
//! separate from its own storage maps.

use crate::models::{Blocker, BlockerKind, ProjectId, TaskId};
use crate::persistence::{BlockerFilter, PersistenceStore};
use crate::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct BlockerStore {
    store: Arc<dyn PersistenceStore>,
}

/// Resume metadata a discovery session stashes inside a blocker's question
/// text, per spec.md §4.6 and §9's "two parallel discovery session designs"
/// note — this crate treats discovery as out of scope and exposes only this
/// resume contract.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResumeMetadata {
    pub session_id: String,
    pub progress_step: u32,
    pub progress_total: u32,
}

impl BlockerStore {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Creates a new blocker, returning its assigned id and timestamps.
    pub async fn create(
        &self,
        project_id: &ProjectId,
        kind: BlockerKind,
        question: impl Into<String>,
        task_id: Option<TaskId>,
        session_id: Option<String>,
    ) -> Result<Blocker> {
        let blocker = Blocker {
            id: String::new(),
            project_id: project_id.clone(),
            kind,
            question: question.into(),
            task_id,
            session_id,
            answer: None,
            created_at: chrono::Utc::now(),
            answered_at: None,
            resume_metadata: None,
        };
        let created = self.store.create_blocker(blocker).await?;
        tracing::info!(blocker_id = %created.id, kind = ?created.kind, "Created blocker");
        Ok(created)
    }

    /// Same as [`BlockerStore::create`], but embeds resume metadata for a
    /// discovery session so a later caller can pick the session back up
    /// from its question text.
    pub async fn create_with_resume(
        &self,
        project_id: &ProjectId,
        question: impl Into<String>,
        resume: ResumeMetadata,
    ) -> Result<Blocker> {
        let blocker = Blocker {
            id: String::new(),
            project_id: project_id.clone(),
            kind: BlockerKind::Async,
            question: question.into(),
            task_id: None,
            session_id: Some(resume.session_id.clone()),
            answer: None,
            created_at: chrono::Utc::now(),
            answered_at: None,
            resume_metadata: Some(serde_json::to_value(&resume)?),
        };
        let created = self.store.create_blocker(blocker).await?;
        Ok(created)
    }

    /// Parses a previously embedded [`ResumeMetadata`] out of a blocker.
    pub fn parse_resume_metadata(blocker: &Blocker) -> Option<ResumeMetadata> {
        blocker
            .resume_metadata
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Stamps `answered_at` and returns the blocker. Idempotent: a second
    /// call to answer an already-answered blocker is a no-op, matching
    /// `PersistenceStore::answer_blocker`'s contract.
    pub async fn answer(&self, id: &str, text: &str) -> Result<Blocker> {
        let blocker = self.store.answer_blocker(id, text).await?;
        tracing::info!(blocker_id = %id, "Answered blocker");
        Ok(blocker)
    }

    /// Pending and answered blockers for a project, each sorted by
    /// `created_at`.
    pub async fn list(&self, project_id: &str) -> Result<(Vec<Blocker>, Vec<Blocker>)> {
        let pending = self
            .store
            .list_blockers_by_project(project_id, BlockerFilter::Pending)
            .await?;
        let answered = self
            .store
            .list_blockers_by_project(project_id, BlockerFilter::Answered)
            .await?;
        Ok((pending, answered))
    }

    pub async fn get(&self, id: &str) -> Result<Blocker> {
        self.store.get_blocker(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistenceStore;

    #[tokio::test]
    async fn create_and_answer_sync_blocker() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        let blockers = BlockerStore::new(persistence.clone());

        let blocker = blockers
            .create(
                &project.id,
                BlockerKind::Sync,
                "does this look right?",
                Some("1.1".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(blocker.answered_at.is_none());

        let answered = blockers.answer(&blocker.id, "yes").await.unwrap();
        assert_eq!(answered.answer.as_deref(), Some("yes"));

        let (pending, done) = blockers.list(&project.id).await.unwrap();
        assert!(pending.is_empty());
        assert_eq!(done.len(), 1);
    }

    #[tokio::test]
    async fn resume_metadata_round_trips() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        let blockers = BlockerStore::new(persistence.clone());

        let resume = ResumeMetadata {
            session_id: "sess-1".to_string(),
            progress_step: 2,
            progress_total: 5,
        };
        let blocker = blockers
            .create_with_resume(&project.id, "continuing discovery", resume.clone())
            .await
            .unwrap();

        let parsed = BlockerStore::parse_resume_metadata(&blocker).unwrap();
        assert_eq!(parsed.session_id, "sess-1");
        assert_eq!(parsed.progress_step, 2);
    }
}
