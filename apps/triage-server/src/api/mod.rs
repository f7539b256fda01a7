pub mod admin;
pub mod help;
pub mod meta;
pub mod metrics;
