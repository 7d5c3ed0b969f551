pub mod conflict;
pub mod stats;
