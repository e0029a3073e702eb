pub mod audit;
pub mod availability;
pub mod lifecycle;
pub mod recurrence;
pub mod reminder;
pub mod reminder_token;
pub mod reservation;
pub mod schedule_config;
