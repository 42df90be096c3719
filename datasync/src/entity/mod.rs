pub mod data_source;
pub mod integration_log;
pub mod integration_log_record;
pub mod mapping_rule;
