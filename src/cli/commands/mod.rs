pub mod analyze;
pub mod config;
pub mod result;
pub mod runs;
pub mod techniques;
