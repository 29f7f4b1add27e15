/// Query interface paths served by the daemon
pub const STATUS_PATH: &str = "/api/status";
pub const STATUS_HASH_PATH: &str = "/api/status/hash";
pub const CONFIG_PATH: &str = "/api/config";
pub const CHECK_PATH: &str = "/api/check";

/// User agent sent with every probe request
pub const PROBE_USER_AGENT: &str = "StatusPage/1.0";

/// Accept header sent with direct probe requests
pub const PROBE_ACCEPT: &str = "application/json, text/plain, */*";
