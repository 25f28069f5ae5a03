//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "wagate".to_string()
}

pub fn default_data_dir() -> String {
    "~/.wagate".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_api_port() -> u16 {
    3000
}

pub fn default_device_name() -> String {
    "WAGATE".to_string()
}

pub fn default_webhook_timeout() -> u64 {
    10
}
