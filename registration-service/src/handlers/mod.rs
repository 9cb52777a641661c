pub mod person;
pub mod roles;
pub mod session;
