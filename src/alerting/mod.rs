pub mod alert_cache;
pub mod check_result;
pub mod evaluation_service;
pub mod message;
pub mod threshold;
