pub mod blueprint;
pub mod company;
pub mod department;
pub mod document;
pub mod notification;
pub mod pin;
pub mod project;
pub mod rbac;
pub mod report;
pub mod task;
pub mod user;
