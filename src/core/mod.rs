pub mod bouncer;
pub mod file_groups;
pub mod links;
