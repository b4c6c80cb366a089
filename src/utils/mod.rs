pub mod attendance_rows;
pub mod db_utils;
pub mod email_filter;
pub mod login_throttle;
pub mod validate;
