use std::env;
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api2.arduino.cc/iot";

#[derive(Debug, Clone)]
pub struct Config {
    pub cloud: CloudConfig,
    pub device: DeviceConfig,
    pub http: HttpConfig,
}

#[derive(Clone)]
pub struct CloudConfig {
    /// Base URL without trailing slash, e.g. `https://api2.arduino.cc/iot`
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub audience: Option<String>,
    pub timeout_secs: u64,
}

// Hand-written so the client secret never ends up in logs.
impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub thing_id: String,
    pub property_id: String,
    pub property_type: PropertyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// Status is published verbatim as a JSON string
    String,
    /// Status is mapped to `true`/`false`
    Boolean,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub listen_host: IpAddr,
    pub listen_port: u16,
}

impl CloudConfig {
    pub fn token_url(&self) -> String {
        format!("{}/v1/clients/token", self.api_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DeviceConfig {
    pub fn publish_url(&self, api_url: &str) -> String {
        format!(
            "{}/v2/things/{}/properties/{}/publish",
            api_url, self.thing_id, self.property_id
        )
    }
}

/// Source of raw configuration values, keyed by variable name.
trait Lookup {
    fn get(&self, key: &str) -> Option<String>;

    fn required(&self, key: &str) -> Result<String, String> {
        self.get(key)
            .ok_or_else(|| format!("{key} environment variable is required"))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }

    fn or_default<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, String> {
        match self.optional(key) {
            Some(v) => v
                .parse()
                .map_err(|_| format!("{key} has an invalid value: {v}")),
            None => Ok(default),
        }
    }
}

struct ProcessEnv;

impl Lookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::load(&ProcessEnv)
    }

    fn load(vars: &impl Lookup) -> Result<Self, String> {
        let api_url = vars
            .optional("ARDUINO_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let property_type = match vars.optional("ARDUINO_PROPERTY_TYPE") {
            Some(raw) => parse_property_type(&raw)?,
            None => PropertyType::String,
        };

        let config = Self {
            cloud: CloudConfig {
                api_url,
                client_id: vars.required("ARDUINO_CLIENT_ID")?,
                client_secret: vars.required("ARDUINO_CLIENT_SECRET")?,
                audience: vars.optional("ARDUINO_AUDIENCE"),
                timeout_secs: vars.or_default("HTTP_TIMEOUT_SECS", 30)?,
            },
            device: DeviceConfig {
                thing_id: vars.required("ARDUINO_THING_ID")?,
                property_id: vars.required("ARDUINO_PROPERTY_ID")?,
                property_type,
            },
            http: HttpConfig {
                listen_host: vars.or_default("LISTEN_HOST", IpAddr::from([0, 0, 0, 0]))?,
                listen_port: vars.or_default("LISTEN_PORT", 4567)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.cloud.client_id.is_empty() {
            return Err("ARDUINO_CLIENT_ID must not be empty".into());
        }
        if self.cloud.client_secret.is_empty() {
            return Err("ARDUINO_CLIENT_SECRET must not be empty".into());
        }
        if self.device.thing_id.is_empty() {
            return Err("ARDUINO_THING_ID must not be empty".into());
        }
        if self.device.property_id.is_empty() {
            return Err("ARDUINO_PROPERTY_ID must not be empty".into());
        }
        if !self.cloud.api_url.starts_with("http://") && !self.cloud.api_url.starts_with("https://")
        {
            return Err(format!(
                "ARDUINO_API_URL must be an http(s) URL, got {}",
                self.cloud.api_url
            ));
        }
        if self.cloud.timeout_secs == 0 {
            return Err("HTTP_TIMEOUT_SECS must be > 0".into());
        }
        Ok(())
    }
}

fn parse_property_type(raw: &str) -> Result<PropertyType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "string" => Ok(PropertyType::String),
        "boolean" | "bool" => Ok(PropertyType::Boolean),
        other => Err(format!(
            "ARDUINO_PROPERTY_TYPE must be 'string' or 'boolean', got '{other}'"
        )),
    }
}
