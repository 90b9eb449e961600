pub mod section;
pub mod term;

pub use section::{EligibilityLabel, Section, SectionFilter};
pub use term::Term;
