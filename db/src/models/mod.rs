pub mod attendance_record;
pub mod attendance_session;
pub mod reader;
pub mod subject;
pub mod verification_token;
