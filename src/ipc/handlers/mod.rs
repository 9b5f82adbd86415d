pub mod core;
pub mod import;
pub mod plan;
pub mod school_year;
