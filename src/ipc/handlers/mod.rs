pub mod certificates;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod quizzes;
