pub mod assignments;
pub mod attendance;
pub mod classes;
pub mod me;
pub mod reports;
pub mod subjects;
pub mod users;
