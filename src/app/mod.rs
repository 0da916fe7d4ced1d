pub mod ports;
pub mod quarantine_use_case;
