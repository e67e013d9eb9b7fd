pub mod status_reporter;
pub mod telegram_control;
pub mod telegram_service;
