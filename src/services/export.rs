use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::Section;

pub const CSV_HEADERS: [&str; 11] = [
    "Section ID",
    "Section Name",
    "Course ID",
    "Course Name",
    "Course Code",
    "SIS Course ID",
    "SIS Section ID",
    "Published",
    "Cross-listed",
    "Parent Course ID",
    "Full Title",
];

/// Render the section snapshot as a flat CSV document.
pub fn sections_to_csv(sections: &[Section]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;

    for s in sections {
        writer.write_record(&[
            s.section_id.to_string(),
            s.section_name.clone(),
            s.course_id.to_string(),
            s.course_name.clone(),
            s.course_code.clone(),
            s.sis_course_id.clone().unwrap_or_default(),
            s.sis_section_id.clone().unwrap_or_default(),
            yes_no(s.published).to_string(),
            yes_no(s.cross_listed).to_string(),
            s.parent_course_id.map(|id| id.to_string()).unwrap_or_default(),
            s.full_title(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("failed to finish CSV: {e}")))
}

pub fn export_filename(term_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "crosslisting_sections_{}_{}.csv",
        term_name.replace(' ', "_"),
        now.format("%Y%m%d_%H%M%S")
    )
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_section() -> Section {
        Section {
            section_id: 2,
            section_name: "002".to_string(),
            course_id: 10,
            course_name: "Intro to Biology".to_string(),
            course_code: "BIO-1405".to_string(),
            sis_course_id: Some("202580-BIO-1405".to_string()),
            sis_section_id: None,
            workflow_state: "unpublished".to_string(),
            published: false,
            cross_listed: true,
            parent_course_id: Some(10),
            enrollment_term_id: Some(1234),
            total_students: 25,
        }
    }

    #[test]
    fn csv_has_expected_header_and_yes_no_rendering() {
        let bytes = sections_to_csv(&[sample_section()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "Section ID,Section Name,Course ID,Course Name,Course Code,\
             SIS Course ID,SIS Section ID,Published,Cross-listed,Parent Course ID,Full Title"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2,002,10,Intro to Biology,BIO-1405,202580-BIO-1405,,No,Yes,10,"));
        assert!(row.ends_with("BIO-1405: Intro to Biology: Section 002"));
    }

    #[test]
    fn empty_snapshot_yields_header_only() {
        let bytes = sections_to_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn filename_slugs_term_name_and_timestamps() {
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap();
        assert_eq!(
            export_filename("Fall 2025", now),
            "crosslisting_sections_Fall_2025_20250901_083000.csv"
        );
    }
}
