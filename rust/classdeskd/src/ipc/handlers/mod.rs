pub mod action_items;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod grades;
pub mod messages;
pub mod notes;
pub mod reports;
pub mod students;
