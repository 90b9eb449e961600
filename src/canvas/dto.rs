use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Section, Term};

/// Envelope returned by the terms endpoint. Unlike most Canvas list
/// endpoints this one wraps the page in an object.
#[derive(Debug, Deserialize)]
pub struct EnrollmentTermsResponse {
    pub enrollment_terms: Vec<TermDto>,
}

#[derive(Debug, Deserialize)]
pub struct TermDto {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl From<TermDto> for Term {
    fn from(dto: TermDto) -> Self {
        Term {
            id: dto.id,
            name: dto.name,
            start_at: dto.start_at,
            end_at: dto.end_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentDto {
    #[serde(default)]
    pub course_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CourseDto {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub sis_course_id: Option<String>,
    pub workflow_state: String,
    #[serde(default)]
    pub total_students: Option<i64>,
    #[serde(default)]
    pub enrollment_term_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SectionDto {
    pub id: i64,
    pub name: String,
    pub course_id: i64,
    #[serde(default)]
    pub sis_section_id: Option<String>,
    /// Set by Canvas when the section has been moved by a cross-list; holds
    /// the course the section originally belonged to.
    #[serde(default)]
    pub nonxlist_course_id: Option<i64>,
}

impl SectionDto {
    pub fn is_cross_listed(&self) -> bool {
        matches!(self.nonxlist_course_id, Some(original) if original != self.course_id)
    }
}

#[derive(Debug, Serialize)]
pub struct CrossListRequest {
    pub new_course_id: i64,
}

/// Merge a course object with one of its sections into the flat shape the
/// rest of the system works with.
pub fn section_from_parts(course: &CourseDto, section: &SectionDto) -> Section {
    let cross_listed = section.is_cross_listed();
    Section {
        section_id: section.id,
        section_name: section.name.clone(),
        course_id: section.course_id,
        course_name: course.name.clone().unwrap_or_default(),
        course_code: course.course_code.clone().unwrap_or_default(),
        sis_course_id: course.sis_course_id.clone(),
        sis_section_id: section.sis_section_id.clone(),
        workflow_state: course.workflow_state.clone(),
        published: course.workflow_state == "available",
        cross_listed,
        parent_course_id: cross_listed.then_some(section.course_id),
        enrollment_term_id: course.enrollment_term_id,
        total_students: course.total_students.unwrap_or(0),
    }
}

/// The crosslist/uncrosslist endpoints echo back only the bare section
/// object; course metadata is not included. Callers must re-fetch the term
/// snapshot rather than trusting this value for anything beyond logging.
pub fn section_from_mutation_echo(dto: SectionDto) -> Section {
    let cross_listed = dto.is_cross_listed();
    Section {
        section_id: dto.id,
        section_name: dto.name,
        course_id: dto.course_id,
        course_name: String::new(),
        course_code: String::new(),
        sis_course_id: None,
        sis_section_id: dto.sis_section_id,
        workflow_state: String::new(),
        published: false,
        cross_listed,
        parent_course_id: cross_listed.then_some(dto.course_id),
        enrollment_term_id: None,
        total_students: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_envelope_parses() {
        let body = r#"{
            "enrollment_terms": [
                {"id": 1234, "name": "Fall 2025", "start_at": "2025-08-20T00:00:00Z", "end_at": null},
                {"id": 1235, "name": "Spring 2026"}
            ]
        }"#;
        let parsed: EnrollmentTermsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.enrollment_terms.len(), 2);
        assert_eq!(parsed.enrollment_terms[0].name, "Fall 2025");
        assert!(parsed.enrollment_terms[0].start_at.is_some());
        assert!(parsed.enrollment_terms[1].end_at.is_none());
    }

    #[test]
    fn section_assembly_derives_publish_and_crosslist_state() {
        let course: CourseDto = serde_json::from_str(
            r#"{"id": 20, "name": "Calculus I", "course_code": "MATH-2413",
                "sis_course_id": "202580-MATH-2413", "workflow_state": "available",
                "total_students": 30, "enrollment_term_id": 1234}"#,
        )
        .unwrap();
        let section: SectionDto = serde_json::from_str(
            r#"{"id": 2, "name": "002", "course_id": 20, "sis_section_id": "202580-MATH-2413-002"}"#,
        )
        .unwrap();

        let merged = section_from_parts(&course, &section);
        assert!(merged.published);
        assert!(!merged.cross_listed);
        assert_eq!(merged.parent_course_id, None);
        assert_eq!(merged.enrollment_term_id, Some(1234));
        assert_eq!(merged.total_students, 30);
    }

    #[test]
    fn nonxlist_course_id_marks_section_cross_listed() {
        let section: SectionDto = serde_json::from_str(
            r#"{"id": 2, "name": "002", "course_id": 10, "nonxlist_course_id": 20}"#,
        )
        .unwrap();
        assert!(section.is_cross_listed());

        // A nonxlist id equal to the current course means the section is home.
        let home: SectionDto = serde_json::from_str(
            r#"{"id": 3, "name": "003", "course_id": 10, "nonxlist_course_id": 10}"#,
        )
        .unwrap();
        assert!(!home.is_cross_listed());
    }

    #[test]
    fn mutation_echo_points_at_current_course() {
        let dto: SectionDto = serde_json::from_str(
            r#"{"id": 2, "name": "002", "course_id": 10, "nonxlist_course_id": 20}"#,
        )
        .unwrap();
        let section = section_from_mutation_echo(dto);
        assert!(section.cross_listed);
        assert_eq!(section.parent_course_id, Some(10));
    }
}
