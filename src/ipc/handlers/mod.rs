pub mod core;
pub mod fees;
pub mod marksheet;
pub mod results;
pub mod school;
pub mod setup;
pub mod students;
