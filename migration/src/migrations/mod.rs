pub mod m202608290001_create_subjects;
pub mod m202608290002_create_readers;
pub mod m202608290003_create_attendance_sessions;
pub mod m202608290004_create_attendance_records;
pub mod m202608290005_create_verification_tokens;
