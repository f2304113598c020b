pub mod meetings;
pub mod realtime;
