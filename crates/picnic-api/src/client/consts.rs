pub const DEFAULT_URL: &str = "https://storefront-prod.{country}.picnicinternational.com/api/{version}";
pub const DEFAULT_COUNTRY_CODE: &str = "DE";
pub const DEFAULT_API_VERSION: &str = "15";
pub const CLIENT_ID: u32 = 30100;

pub const AUTH_HEADER: &str = "x-picnic-auth";
pub const AGENT_HEADER: &str = "x-picnic-agent";
pub const AGENT_HEADER_VALUE: &str = "30100;1.15.269-#15289;";
pub const DEVICE_HEADER: &str = "x-picnic-did";
pub const DEVICE_HEADER_VALUE: &str = "543809EC162F0B0B";

pub const AUTH_ERROR_CODES: [&str; 2] = ["AUTH_ERROR", "AUTH_INVALID_CRED"];
