use serde::{Deserialize, Serialize};

/// A course section as assembled from the Canvas course and section objects.
///
/// `published` and `cross_listed` are derived at fetch time from the course
/// `workflow_state` and the section `nonxlist_course_id`. The remote API is
/// the source of truth; a successful cross-list or un-cross-list is always
/// followed by a full re-fetch rather than a local patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: i64,
    pub section_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub course_code: String,
    pub sis_course_id: Option<String>,
    pub sis_section_id: Option<String>,
    pub workflow_state: String,
    pub published: bool,
    pub cross_listed: bool,
    /// The course a cross-listed section currently lives in. `None` unless
    /// `cross_listed` is true.
    pub parent_course_id: Option<i64>,
    pub enrollment_term_id: Option<i64>,
    pub total_students: i64,
}

impl Section {
    pub fn full_title(&self) -> String {
        format!(
            "{}: {}: Section {}",
            self.course_code, self.course_name, self.section_name
        )
    }

    /// Compute the eligibility label at render time.
    ///
    /// Parent candidates are unpublished and not cross-listed; child
    /// candidates are published and not cross-listed. The two sets are
    /// disjoint by construction. Sections whose course is in a terminal
    /// workflow state (completed, deleted) cannot participate at all.
    pub fn eligibility(&self) -> EligibilityLabel {
        if self.cross_listed {
            return EligibilityLabel::AlreadyCrossListed;
        }
        if self.workflow_state != "available" && self.workflow_state != "unpublished" {
            return EligibilityLabel::Ineligible;
        }
        if self.published {
            EligibilityLabel::ChildCandidate
        } else {
            EligibilityLabel::ParentCandidate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EligibilityLabel {
    ParentCandidate,
    ChildCandidate,
    AlreadyCrossListed,
    Ineligible,
}

/// Narrowing criteria for a section fetch. Passed explicitly to every
/// operation so the client and validator stay free of ambient state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionFilter {
    /// Faculty path: scope by this instructor's teacher enrollments.
    pub instructor_id: Option<i64>,
    /// Staff path: account-level course search.
    pub search_term: Option<String>,
}

impl SectionFilter {
    pub fn is_empty(&self) -> bool {
        self.instructor_id.is_none() && self.search_term.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(published: bool, cross_listed: bool) -> Section {
        Section {
            section_id: 1,
            section_name: "001".to_string(),
            course_id: 10,
            course_name: "Intro to Biology".to_string(),
            course_code: "BIO-1405".to_string(),
            sis_course_id: None,
            sis_section_id: None,
            workflow_state: if published { "available" } else { "unpublished" }.to_string(),
            published,
            cross_listed,
            parent_course_id: if cross_listed { Some(99) } else { None },
            enrollment_term_id: Some(1234),
            total_students: 25,
        }
    }

    #[test]
    fn unpublished_uncrosslisted_is_parent_candidate() {
        assert_eq!(
            section(false, false).eligibility(),
            EligibilityLabel::ParentCandidate
        );
    }

    #[test]
    fn published_uncrosslisted_is_child_candidate() {
        assert_eq!(
            section(true, false).eligibility(),
            EligibilityLabel::ChildCandidate
        );
    }

    #[test]
    fn cross_listed_wins_regardless_of_publish_state() {
        assert_eq!(
            section(true, true).eligibility(),
            EligibilityLabel::AlreadyCrossListed
        );
        assert_eq!(
            section(false, true).eligibility(),
            EligibilityLabel::AlreadyCrossListed
        );
    }

    #[test]
    fn terminal_workflow_state_is_ineligible() {
        let mut s = section(false, false);
        s.workflow_state = "completed".to_string();
        assert_eq!(s.eligibility(), EligibilityLabel::Ineligible);
        s.workflow_state = "deleted".to_string();
        assert_eq!(s.eligibility(), EligibilityLabel::Ineligible);
    }

    #[test]
    fn labels_partition_the_publish_crosslist_matrix() {
        // Every (published, cross_listed) pair maps to exactly one label, and
        // the parent and child candidate sets never overlap.
        let mut parents = 0;
        let mut children = 0;
        for published in [false, true] {
            for cross_listed in [false, true] {
                match section(published, cross_listed).eligibility() {
                    EligibilityLabel::ParentCandidate => {
                        assert!(!published && !cross_listed);
                        parents += 1;
                    }
                    EligibilityLabel::ChildCandidate => {
                        assert!(published && !cross_listed);
                        children += 1;
                    }
                    EligibilityLabel::AlreadyCrossListed => assert!(cross_listed),
                    EligibilityLabel::Ineligible => panic!("unexpected for live workflow states"),
                }
            }
        }
        assert_eq!(parents, 1);
        assert_eq!(children, 1);
    }

    #[test]
    fn full_title_concatenates_code_name_and_section() {
        assert_eq!(
            section(true, false).full_title(),
            "BIO-1405: Intro to Biology: Section 001"
        );
    }
}
