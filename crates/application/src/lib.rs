#![forbid(unsafe_code)]

pub mod fqdn_service_impl;
pub mod query_scheduler;
pub mod rule_sync_tracker;
