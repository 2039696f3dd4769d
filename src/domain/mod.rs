pub mod conflict;
pub mod interval;
pub mod layout;
pub mod models;
pub mod planner;
pub mod recurrence;
pub mod splitter;
pub mod time_blocks;
