//! Progress, eligibility and enrollment-consistency rules.
//!
//! Every operation is a short synchronous unit of work against the store
//! traits. Callers pass the clock in so results are reproducible.

pub mod eligibility;
pub mod enrollment;
pub mod progress;

pub use eligibility::{check_certificate, issue_once, Eligibility};
pub use enrollment::{enroll_student, reconcile_enrollments, unenroll};
pub use progress::{
    complete_lesson, recalculate_for, refresh_course, Recalculation, RefreshSummary,
};
