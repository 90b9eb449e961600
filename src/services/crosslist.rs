use std::sync::Arc;

use tracing::{info, warn};

use crate::canvas::CanvasClient;
use crate::error::AppError;
use crate::models::{Section, SectionFilter};
use crate::services::audit::{AuditLog, AuditRecord};

/// First failing rule for a proposed cross-listing. Checks run in a fixed
/// order so the same proposal always reports the same reason: course
/// equality, then term, then cross-list state, then publish state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    SameCourse,
    TermMismatch,
    ParentCrossListed,
    ChildCrossListed,
    ParentPublished,
    ChildUnpublished,
    NotCrossListed,
}

impl ValidationFailure {
    pub fn message(&self) -> &'static str {
        match self {
            ValidationFailure::SameCourse => {
                "parent and child sections belong to the same course"
            }
            ValidationFailure::TermMismatch => {
                "parent and child sections belong to different terms"
            }
            ValidationFailure::ParentCrossListed => "parent section is already cross-listed",
            ValidationFailure::ChildCrossListed => "child section is already cross-listed",
            ValidationFailure::ParentPublished => {
                "parent course must be unpublished for cross-listing"
            }
            ValidationFailure::ChildUnpublished => {
                "child course must be published for cross-listing"
            }
            ValidationFailure::NotCrossListed => "section is not cross-listed",
        }
    }
}

impl From<ValidationFailure> for AppError {
    fn from(failure: ValidationFailure) -> Self {
        AppError::Validation(failure.message().to_string())
    }
}

/// Decide whether `child` may be merged into `parent`'s course. Evaluated
/// fresh on every proposal; stops at the first failing rule.
pub fn validate_pair(parent: &Section, child: &Section) -> Result<(), ValidationFailure> {
    if parent.course_id == child.course_id {
        return Err(ValidationFailure::SameCourse);
    }
    if parent.enrollment_term_id != child.enrollment_term_id {
        return Err(ValidationFailure::TermMismatch);
    }
    if parent.cross_listed {
        return Err(ValidationFailure::ParentCrossListed);
    }
    if child.cross_listed {
        return Err(ValidationFailure::ChildCrossListed);
    }
    if parent.published {
        return Err(ValidationFailure::ParentPublished);
    }
    if !child.published {
        return Err(ValidationFailure::ChildUnpublished);
    }
    Ok(())
}

/// Un-cross-listing has a single rule: the section must currently be
/// cross-listed.
pub fn validate_un_cross_list(section: &Section) -> Result<(), ValidationFailure> {
    if !section.cross_listed {
        return Err(ValidationFailure::NotCrossListed);
    }
    Ok(())
}

/// Drives a validated mutation against the remote API and reconciles the
/// section snapshot afterward. The remote is authoritative: every accepted
/// operation issues exactly one mutation call followed by a full term
/// re-fetch, and local state is never patched in place.
pub struct CrosslistService {
    canvas: Arc<dyn CanvasClient>,
    audit: Arc<AuditLog>,
}

impl CrosslistService {
    pub fn new(canvas: Arc<dyn CanvasClient>, audit: Arc<AuditLog>) -> Self {
        Self { canvas, audit }
    }

    pub async fn snapshot(
        &self,
        term_id: i64,
        filter: &SectionFilter,
    ) -> Result<Vec<Section>, AppError> {
        self.canvas.fetch_sections(term_id, filter).await
    }

    /// Merge `child_section_id` into `parent_course_id` and return the
    /// refreshed snapshot. A validation rejection means no network mutation
    /// was attempted; a transient failure after the call was issued leaves
    /// the remote outcome uncertain, so the term is re-fetched for
    /// reconciliation either way.
    pub async fn cross_list(
        &self,
        term_id: i64,
        filter: &SectionFilter,
        parent_course_id: i64,
        child_section_id: i64,
        operator: &str,
    ) -> Result<Vec<Section>, AppError> {
        let snapshot = self.canvas.fetch_sections(term_id, filter).await?;

        // The parent rules are about the COURSE, so the representative
        // section must be a home section of it. A previously merged child
        // also carries the parent's course_id but is cross-listed, and must
        // not speak for the course.
        let parent = snapshot
            .iter()
            .find(|s| s.course_id == parent_course_id && !s.cross_listed)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no home section of course {parent_course_id} in term {term_id}"
                ))
            })?;
        let child = snapshot
            .iter()
            .find(|s| s.section_id == child_section_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "section {child_section_id} not found in term {term_id}"
                ))
            })?;

        // Rejected proposals never reach the network, so the caller knows
        // nothing was applied.
        validate_pair(parent, child)?;

        let outcome = self
            .canvas
            .cross_list(child_section_id, parent_course_id)
            .await;

        self.record_audit(AuditRecord::new(
            operator,
            "crosslist",
            child_section_id,
            Some(parent_course_id),
            outcome.is_ok(),
        ));

        match outcome {
            Ok(echo) => {
                info!(
                    "cross-listed section {} into course {} (echo: course {})",
                    child_section_id, parent_course_id, echo.course_id
                );
                self.canvas.fetch_sections(term_id, filter).await
            }
            Err(e) => {
                self.reconcile_after_failure(term_id, filter, child_section_id)
                    .await;
                Err(e)
            }
        }
    }

    /// Revert a cross-listed section to its home course and return the
    /// refreshed snapshot.
    pub async fn un_cross_list(
        &self,
        term_id: i64,
        filter: &SectionFilter,
        section_id: i64,
        operator: &str,
    ) -> Result<Vec<Section>, AppError> {
        let snapshot = self.canvas.fetch_sections(term_id, filter).await?;

        let section = snapshot
            .iter()
            .find(|s| s.section_id == section_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("section {section_id} not found in term {term_id}"))
            })?;

        validate_un_cross_list(section)?;

        let outcome = self.canvas.un_cross_list(section_id).await;

        self.record_audit(AuditRecord::new(
            operator,
            "uncrosslist",
            section_id,
            None,
            outcome.is_ok(),
        ));

        match outcome {
            Ok(_) => {
                info!("un-cross-listed section {}", section_id);
                self.canvas.fetch_sections(term_id, filter).await
            }
            Err(e) => {
                self.reconcile_after_failure(term_id, filter, section_id).await;
                Err(e)
            }
        }
    }

    /// After a failed mutation the remote state is uncertain. Re-fetch so
    /// the true state is known and logged; the original error still reaches
    /// the caller.
    async fn reconcile_after_failure(
        &self,
        term_id: i64,
        filter: &SectionFilter,
        section_id: i64,
    ) {
        match self.canvas.fetch_sections(term_id, filter).await {
            Ok(refreshed) => {
                let applied = refreshed
                    .iter()
                    .find(|s| s.section_id == section_id)
                    .map(|s| s.cross_listed);
                warn!(
                    "mutation on section {} failed; remote cross_listed state is now {:?}",
                    section_id, applied
                );
            }
            Err(e) => warn!(
                "mutation on section {} failed and reconciliation re-fetch also failed: {}",
                section_id, e
            ),
        }
    }

    fn record_audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record) {
            // Audit trouble is reported but never masks the operation result.
            warn!("failed to append audit record: {}", e);
        }
    }
}
