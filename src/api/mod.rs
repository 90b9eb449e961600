use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{EligibilityLabel, Section, SectionFilter, Term};
use crate::services::export::{export_filename, sections_to_csv};
use crate::services::CrosslistService;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/terms", get(list_terms))
        .route("/sections", get(list_sections))
        .route("/crosslist", post(cross_list))
        .route("/uncrosslist", post(un_cross_list))
        .route("/export", get(export_sections))
        .route("/audit/export", get(export_audit))
        .with_state(state)
}

/// A section plus its render-time eligibility label.
#[derive(Debug, Serialize)]
pub struct SectionView {
    #[serde(flatten)]
    pub section: Section,
    pub eligibility: EligibilityLabel,
}

impl From<Section> for SectionView {
    fn from(section: Section) -> Self {
        let eligibility = section.eligibility();
        Self {
            section,
            eligibility,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SectionsQuery {
    term_id: i64,
    #[serde(default)]
    instructor_id: Option<i64>,
    #[serde(default)]
    search: Option<String>,
}

impl SectionsQuery {
    fn filter(&self) -> SectionFilter {
        SectionFilter {
            instructor_id: self.instructor_id,
            search_term: self.search.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CrossListBody {
    term_id: i64,
    parent_course_id: i64,
    child_section_id: i64,
    #[serde(default)]
    instructor_id: Option<i64>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    operator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnCrossListBody {
    term_id: i64,
    section_id: i64,
    #[serde(default)]
    instructor_id: Option<i64>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    operator: Option<String>,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_terms(State(state): State<AppState>) -> Result<Json<Vec<Term>>, AppError> {
    let terms = state.canvas.fetch_terms().await?;
    Ok(Json(terms))
}

async fn list_sections(
    State(state): State<AppState>,
    Query(query): Query<SectionsQuery>,
) -> Result<Json<Vec<SectionView>>, AppError> {
    let filter = query.filter();
    if filter.is_empty() {
        return Err(AppError::Validation(
            "provide an instructor_id or a search term".to_string(),
        ));
    }
    let service = CrosslistService::new(state.canvas.clone(), state.audit.clone());
    let sections = service.snapshot(query.term_id, &filter).await?;
    Ok(Json(sections.into_iter().map(SectionView::from).collect()))
}

async fn cross_list(
    State(state): State<AppState>,
    Json(body): Json<CrossListBody>,
) -> Result<Json<Vec<SectionView>>, AppError> {
    let filter = SectionFilter {
        instructor_id: body.instructor_id,
        search_term: body.search.clone(),
    };
    let service = CrosslistService::new(state.canvas.clone(), state.audit.clone());
    let refreshed = service
        .cross_list(
            body.term_id,
            &filter,
            body.parent_course_id,
            body.child_section_id,
            body.operator.as_deref().unwrap_or("web"),
        )
        .await?;
    Ok(Json(refreshed.into_iter().map(SectionView::from).collect()))
}

async fn un_cross_list(
    State(state): State<AppState>,
    Json(body): Json<UnCrossListBody>,
) -> Result<Json<Vec<SectionView>>, AppError> {
    let filter = SectionFilter {
        instructor_id: body.instructor_id,
        search_term: body.search.clone(),
    };
    let service = CrosslistService::new(state.canvas.clone(), state.audit.clone());
    let refreshed = service
        .un_cross_list(
            body.term_id,
            &filter,
            body.section_id,
            body.operator.as_deref().unwrap_or("web"),
        )
        .await?;
    Ok(Json(refreshed.into_iter().map(SectionView::from).collect()))
}

async fn export_sections(
    State(state): State<AppState>,
    Query(query): Query<SectionsQuery>,
) -> Result<Response, AppError> {
    let filter = query.filter();
    if filter.is_empty() {
        return Err(AppError::Validation(
            "provide an instructor_id or a search term".to_string(),
        ));
    }

    let terms = state.canvas.fetch_terms().await?;
    let term = terms
        .iter()
        .find(|t| t.id == query.term_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown term {}", query.term_id)))?;

    let service = CrosslistService::new(state.canvas.clone(), state.audit.clone());
    let sections = service.snapshot(query.term_id, &filter).await?;
    let csv = sections_to_csv(&sections)?;
    let filename = export_filename(&term.name, Utc::now());

    Ok(csv_attachment(csv, &filename))
}

async fn export_audit(State(state): State<AppState>) -> Result<Response, AppError> {
    let contents = state
        .audit
        .read_all()?
        .ok_or_else(|| AppError::NotFound("no audit log recorded yet".to_string()))?;
    let filename = format!("crosslist_audit_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok(csv_attachment(contents, &filename))
}

fn csv_attachment(body: Vec<u8>, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
