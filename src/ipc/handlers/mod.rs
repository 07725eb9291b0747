pub mod announcements;
pub mod auth;
pub mod bulk;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod demo;
pub mod fees;
pub mod results;
pub mod setup;
pub mod students;
