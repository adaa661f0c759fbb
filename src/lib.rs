pub mod alerting;
pub mod check_modules;
