pub mod batch;
pub mod events;
pub mod fixes;
pub mod parser;
pub mod rubric;
pub mod types;
