use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::clock::{Transition, TransitionTable};
use crate::notify::webhook_url;
use crate::suggestion::{Locale, ScheduleConfig, STANDARD_WEEK};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TZ_HORIZON_YEARS: u32 = 10;
pub const DEFAULT_WEBHOOK_ID: &str = "badger2040w";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;
pub const DEFAULT_MQTT_CLIENT_ID: &str = "offpeak-panel";
pub const DEFAULT_MQTT_KEEPALIVE_SECS: u64 = 60;
pub const DEFAULT_MQTT_TOPIC: &str = "badger/msg";

/// Where the DST transition table comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TimezoneSource {
    /// Table shipped with the panel
    Builtin,
    /// Explicit `epoch:offset` pairs
    Transitions(Vec<Transition>),
    /// Generated at boot from the zone database
    Zone { tz: Tz, horizon_years: u32 },
}

impl TimezoneSource {
    /// Build the table; zone tables start at `now`.
    pub fn build(&self, now: i64) -> Result<TransitionTable> {
        match self {
            TimezoneSource::Builtin => Ok(TransitionTable::builtin()),
            TimezoneSource::Transitions(entries) => TransitionTable::new(entries.clone())
                .context("TZ_TRANSITIONS is not a valid transition table"),
            TimezoneSource::Zone { tz, horizon_years } => {
                TransitionTable::from_zone(*tz, now, *horizon_years)
                    .with_context(|| format!("Cannot build a transition table for {}", tz.name()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub protocol: String,
    pub hostname: String,
    pub webhook_id: String,
}

impl WebhookConfig {
    pub fn url(&self) -> String {
        webhook_url(&self.protocol, &self.hostname, &self.webhook_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub client_id: String,
    /// Username and password, always set together
    pub credentials: Option<(String, String)>,
    pub keepalive_secs: u64,
    pub topic: String,
    pub tls: bool,
    /// PEM bundle trusted instead of the platform roots
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Off-peak tariff
    pub off_peak_start_hour: u32,
    pub off_peak_end_hour: u32,
    pub max_cycle_duration_hours: u32,

    // Poll loop
    pub poll_interval_secs: u64,

    // Local time
    pub timezone: TimezoneSource,
    pub locale: Locale,

    // Home Assistant webhook (optional, enabled by HA_HOSTNAME)
    pub webhook: Option<WebhookConfig>,

    // MQTT broker (optional, enabled by MQTT_SERVER)
    pub mqtt: Option<MqttConfig>,

    // Upper bound for one delivery attempt to one sink
    pub sink_timeout_secs: u64,

    // Health check HTTP server port (optional, disabled if not set)
    pub health_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timezone = match (get("TZ_NAME"), get("TZ_TRANSITIONS")) {
            (Some(_), Some(_)) => bail!("TZ_NAME and TZ_TRANSITIONS are mutually exclusive"),
            (Some(name), None) => TimezoneSource::Zone {
                tz: Tz::from_str(&name)
                    .map_err(|_| anyhow!("TZ_NAME '{}' is not a known IANA zone", name))?,
                horizon_years: parse_or("TZ_HORIZON_YEARS", get("TZ_HORIZON_YEARS"), DEFAULT_TZ_HORIZON_YEARS)?,
            },
            (None, Some(spec)) => TimezoneSource::Transitions(
                parse_transitions(&spec).context("TZ_TRANSITIONS must be comma separated epoch:offset pairs")?,
            ),
            (None, None) => TimezoneSource::Builtin,
        };

        let locale = match get("LOCALE") {
            Some(value) => value
                .parse()
                .map_err(|e: String| anyhow!("LOCALE: {}", e))?,
            None => Locale::default(),
        };

        let webhook = get("HA_HOSTNAME").map(|hostname| WebhookConfig {
            protocol: get("HA_PROTOCOL").unwrap_or_else(|| "http".to_string()),
            hostname,
            webhook_id: get("HA_WEBHOOK_ID").unwrap_or_else(|| DEFAULT_WEBHOOK_ID.to_string()),
        });

        let mqtt = match get("MQTT_SERVER") {
            Some(server) => {
                let credentials = match (get("MQTT_USER"), get("MQTT_PASSWORD")) {
                    (Some(user), Some(pass)) => Some((user, pass)),
                    (None, None) => None,
                    _ => bail!("MQTT_USER and MQTT_PASSWORD must be set together"),
                };
                let tls = parse_flag("MQTT_TLS", get("MQTT_TLS"))?;
                let default_port = if tls { DEFAULT_MQTTS_PORT } else { DEFAULT_MQTT_PORT };
                Some(MqttConfig {
                    server,
                    port: parse_or("MQTT_PORT", get("MQTT_PORT"), default_port)?,
                    client_id: get("MQTT_CLIENT_ID")
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                    credentials,
                    keepalive_secs: parse_or(
                        "MQTT_KEEPALIVE_SECS",
                        get("MQTT_KEEPALIVE_SECS"),
                        DEFAULT_MQTT_KEEPALIVE_SECS,
                    )?,
                    topic: get("MQTT_TOPIC").unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                    tls,
                    ca_file: get("MQTT_CA_FILE").map(PathBuf::from),
                })
            }
            None => None,
        };

        Ok(Config {
            off_peak_start_hour: parse_or(
                "OFF_PEAK_START_HOUR",
                get("OFF_PEAK_START_HOUR"),
                crate::suggestion::DEFAULT_OFF_PEAK_START_HOUR,
            )?,
            off_peak_end_hour: parse_or(
                "OFF_PEAK_END_HOUR",
                get("OFF_PEAK_END_HOUR"),
                crate::suggestion::DEFAULT_OFF_PEAK_END_HOUR,
            )?,
            max_cycle_duration_hours: parse_or(
                "MAX_CYCLE_DURATION_HOURS",
                get("MAX_CYCLE_DURATION_HOURS"),
                crate::suggestion::DEFAULT_MAX_CYCLE_DURATION_HOURS,
            )?,
            poll_interval_secs: parse_or(
                "POLL_INTERVAL_SECS",
                get("POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            timezone,
            locale,
            webhook,
            mqtt,
            sink_timeout_secs: parse_or(
                "SINK_TIMEOUT_SECS",
                get("SINK_TIMEOUT_SECS"),
                DEFAULT_SINK_TIMEOUT_SECS,
            )?,
            health_port: get("HEALTH_PORT")
                .map(|s| s.parse::<u16>().context("HEALTH_PORT must be a valid port number"))
                .transpose()?,
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            off_peak_start_hour: self.off_peak_start_hour,
            off_peak_end_hour: self.off_peak_end_hour,
            max_cycle_duration_hours: self.max_cycle_duration_hours,
            week: STANDARD_WEEK,
        }
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        for (name, hour) in [
            ("OFF_PEAK_START_HOUR", self.off_peak_start_hour),
            ("OFF_PEAK_END_HOUR", self.off_peak_end_hour),
        ] {
            if hour > 23 {
                errors.push(format!("{}={} is not an hour (0-23).", name, hour));
            }
        }

        if self.max_cycle_duration_hours == 0 {
            errors.push("MAX_CYCLE_DURATION_HOURS must be greater than 0.".to_string());
        } else if self.max_cycle_duration_hours > 23 {
            errors.push(format!(
                "MAX_CYCLE_DURATION_HOURS={} is longer than a day.",
                self.max_cycle_duration_hours
            ));
        }

        // The early-morning "start now" threshold is end - max; it must not go negative
        if self.max_cycle_duration_hours > self.off_peak_end_hour {
            errors.push(format!(
                "MAX_CYCLE_DURATION_HOURS={} exceeds OFF_PEAK_END_HOUR={}; no morning start could finish off-peak.",
                self.max_cycle_duration_hours, self.off_peak_end_hour
            ));
        } else if self.off_peak_start_hour <= 23 && self.schedule().longest_delay() > 23 {
            errors.push(format!(
                "OFF_PEAK_START_HOUR={}, OFF_PEAK_END_HOUR={} and MAX_CYCLE_DURATION_HOURS={} allow a delayed start of {} hours (max 23).",
                self.off_peak_start_hour,
                self.off_peak_end_hour,
                self.max_cycle_duration_hours,
                self.schedule().longest_delay()
            ));
        }

        if self.poll_interval_secs == 0 {
            errors.push("POLL_INTERVAL_SECS must be greater than 0.".to_string());
        }

        if self.sink_timeout_secs == 0 {
            errors.push("SINK_TIMEOUT_SECS must be greater than 0.".to_string());
        }

        match &self.timezone {
            TimezoneSource::Transitions(entries) => {
                if let Err(e) = TransitionTable::new(entries.clone()) {
                    errors.push(format!("TZ_TRANSITIONS invalid: {}.", e));
                }
            }
            TimezoneSource::Zone { horizon_years, .. } => {
                if *horizon_years == 0 || *horizon_years > 50 {
                    errors.push(format!(
                        "TZ_HORIZON_YEARS={} must be between 1 and 50.",
                        horizon_years
                    ));
                }
            }
            TimezoneSource::Builtin => {}
        }

        if let Some(webhook) = &self.webhook {
            if !matches!(webhook.protocol.as_str(), "http" | "https") {
                errors.push(format!(
                    "HA_PROTOCOL '{}' invalid. Expected http or https.",
                    webhook.protocol
                ));
            }
            if webhook.hostname.contains('/') {
                errors.push(format!(
                    "HA_HOSTNAME '{}' must be a host (and optional port), not a URL.",
                    webhook.hostname
                ));
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.keepalive_secs < 5 {
                errors.push(format!(
                    "MQTT_KEEPALIVE_SECS={} too short (min 5).",
                    mqtt.keepalive_secs
                ));
            }
            if mqtt.topic.contains(['+', '#']) {
                errors.push(format!(
                    "MQTT_TOPIC '{}' cannot contain wildcards.",
                    mqtt.topic
                ));
            }
            if mqtt.ca_file.is_some() && !mqtt.tls {
                errors.push("MQTT_CA_FILE is set but MQTT_TLS is off.".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}

/// Parse an optional value, naming the variable on failure
fn parse_or<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", name, v)),
        None => Ok(default),
    }
}

/// Parse an optional on/off switch, off when unset
fn parse_flag(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false" | "0" | "no" | "off") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some(other) => bail!("{} must be true or false, got '{}'", name, other),
    }
}

/// Parse `epoch:offset,epoch:offset,...`
pub fn parse_transitions(spec: &str) -> Result<Vec<Transition>> {
    spec.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (epoch, offset) = pair
                .split_once(':')
                .with_context(|| format!("'{}' is missing ':'", pair))?;
            let threshold: i64 = epoch
                .trim()
                .parse()
                .with_context(|| format!("'{}' is not an epoch", epoch))?;
            let offset_hours: i32 = offset
                .trim()
                .parse()
                .with_context(|| format!("'{}' is not an hour offset", offset))?;
            if !(-12..=14).contains(&offset_hours) {
                bail!("offset {} is outside -12..=14", offset_hours);
            }
            Ok(Transition::new(threshold, offset_hours))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_env() -> HashMap<&'static str, &'static str> {
        HashMap::new()
    }

    fn full_env() -> HashMap<&'static str, &'static str> {
        let mut m = HashMap::new();
        m.insert("HA_HOSTNAME", "ha.local:8123");
        m.insert("MQTT_SERVER", "broker.local");
        m.insert("MQTT_USER", "panel");
        m.insert("MQTT_PASSWORD", "secret");
        m
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_map(&minimal_valid_env()).expect("empty env should parse");

        assert_eq!(config.off_peak_start_hour, 22);
        assert_eq!(config.off_peak_end_hour, 7);
        assert_eq!(config.max_cycle_duration_hours, 4);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.timezone, TimezoneSource::Builtin);
        assert_eq!(config.locale, Locale::En);
        assert!(config.webhook.is_none());
        assert!(config.mqtt.is_none());
        assert_eq!(config.sink_timeout_secs, 10);
        assert!(config.health_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schedule_from_config() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_START_HOUR", "23");
        env.insert("OFF_PEAK_END_HOUR", "6");
        env.insert("MAX_CYCLE_DURATION_HOURS", "3");
        let config = Config::from_map(&env).expect("should parse");
        let schedule = config.schedule();
        assert_eq!(schedule.off_peak_start_hour, 23);
        assert_eq!(schedule.off_peak_end_hour, 6);
        assert_eq!(schedule.max_cycle_duration_hours, 3);
        assert_eq!(schedule.week, STANDARD_WEEK);
    }

    #[test]
    fn test_invalid_hour_not_numeric() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_START_HOUR", "ten");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("OFF_PEAK_START_HOUR"), "error should name the variable: {}", err);
    }

    #[test]
    fn test_negative_hour_rejected() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_END_HOUR", "-1");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn test_whitespace_values_trimmed() {
        let mut env = minimal_valid_env();
        env.insert("POLL_INTERVAL_SECS", " 30 ");
        env.insert("HA_HOSTNAME", "   ");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.webhook.is_none(), "blank hostname disables the webhook");
    }

    #[test]
    fn test_webhook_defaults() {
        let config = Config::from_map(&full_env()).expect("should parse");
        let webhook = config.webhook.expect("webhook enabled");
        assert_eq!(webhook.protocol, "http");
        assert_eq!(webhook.webhook_id, "badger2040w");
        assert_eq!(webhook.url(), "http://ha.local:8123/api/webhook/badger2040w");
    }

    #[test]
    fn test_mqtt_defaults() {
        let config = Config::from_map(&full_env()).expect("should parse");
        let mqtt = config.mqtt.expect("mqtt enabled");
        assert_eq!(mqtt.server, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "offpeak-panel");
        assert_eq!(mqtt.topic, "badger/msg");
        assert_eq!(mqtt.keepalive_secs, 60);
        assert_eq!(
            mqtt.credentials,
            Some(("panel".to_string(), "secret".to_string()))
        );
        assert!(!mqtt.tls);
        assert_eq!(mqtt.ca_file, None);
    }

    #[test]
    fn test_mqtt_tls() {
        let mut env = full_env();
        env.insert("MQTT_TLS", "true");
        let mqtt = Config::from_map(&env).unwrap().mqtt.unwrap();
        assert!(mqtt.tls);
        assert_eq!(mqtt.port, 8883, "TLS moves the default port");

        env.insert("MQTT_PORT", "1884");
        env.insert("MQTT_CA_FILE", "/etc/ssl/broker-ca.pem");
        let config = Config::from_map(&env).unwrap();
        assert!(config.validate().is_ok());
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.port, 1884);
        assert_eq!(mqtt.ca_file, Some(PathBuf::from("/etc/ssl/broker-ca.pem")));

        for off in ["false", "0", "No"] {
            env.insert("MQTT_TLS", off);
            assert!(!Config::from_map(&env).unwrap().mqtt.unwrap().tls, "{}", off);
        }

        env.insert("MQTT_TLS", "maybe");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("MQTT_TLS"), "{}", err);
    }

    #[test]
    fn test_mqtt_ca_file_without_tls() {
        let mut env = full_env();
        env.insert("MQTT_CA_FILE", "/etc/ssl/broker-ca.pem");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MQTT_CA_FILE"), "{}", err);
    }

    #[test]
    fn test_mqtt_anonymous() {
        let mut env = minimal_valid_env();
        env.insert("MQTT_SERVER", "broker.local");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(config.mqtt.unwrap().credentials, None);
    }

    #[test]
    fn test_mqtt_user_without_password() {
        let mut env = minimal_valid_env();
        env.insert("MQTT_SERVER", "broker.local");
        env.insert("MQTT_USER", "panel");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("MQTT_PASSWORD"), "error should mention the pair: {}", err);
    }

    #[test]
    fn test_mqtt_invalid_port() {
        let mut env = full_env();
        env.insert("MQTT_PORT", "99999");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("MQTT_PORT"));
    }

    #[test]
    fn test_transitions_parse() {
        let mut env = minimal_valid_env();
        env.insert("TZ_TRANSITIONS", "1711846800:2, 1729994400:1");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(
            config.timezone,
            TimezoneSource::Transitions(vec![
                Transition::new(1711846800, 2),
                Transition::new(1729994400, 1),
            ])
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transitions_malformed() {
        let mut env = minimal_valid_env();
        env.insert("TZ_TRANSITIONS", "1711846800=2");
        let err = format!("{:#}", Config::from_map(&env).unwrap_err());
        assert!(err.contains("TZ_TRANSITIONS"), "{}", err);
    }

    #[test]
    fn test_transitions_not_increasing_fails_validation() {
        let mut env = minimal_valid_env();
        env.insert("TZ_TRANSITIONS", "200:2,100:1");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("TZ_TRANSITIONS"), "{}", err);
    }

    #[test]
    fn test_tz_name() {
        let mut env = minimal_valid_env();
        env.insert("TZ_NAME", "Europe/Brussels");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(
            config.timezone,
            TimezoneSource::Zone {
                tz: chrono_tz::Europe::Brussels,
                horizon_years: 10
            }
        );
    }

    #[test]
    fn test_tz_name_unknown() {
        let mut env = minimal_valid_env();
        env.insert("TZ_NAME", "Mars/Olympus_Mons");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("TZ_NAME"));
    }

    #[test]
    fn test_tz_sources_exclusive() {
        let mut env = minimal_valid_env();
        env.insert("TZ_NAME", "Europe/Brussels");
        env.insert("TZ_TRANSITIONS", "1711846800:2");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn test_locale() {
        let mut env = minimal_valid_env();
        env.insert("LOCALE", "fr");
        assert_eq!(Config::from_map(&env).unwrap().locale, Locale::Fr);

        env.insert("LOCALE", "klingon");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("LOCALE"));
    }

    #[test]
    fn test_validation_hour_out_of_range() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_START_HOUR", "24");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("OFF_PEAK_START_HOUR"), "{}", err);
    }

    #[test]
    fn test_validation_zero_cycle() {
        let mut env = minimal_valid_env();
        env.insert("MAX_CYCLE_DURATION_HOURS", "0");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MAX_CYCLE_DURATION_HOURS"), "{}", err);
    }

    #[test]
    fn test_validation_cycle_longer_than_morning() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_END_HOUR", "3");
        env.insert("MAX_CYCLE_DURATION_HOURS", "4");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("exceeds OFF_PEAK_END_HOUR"), "{}", err);
    }

    #[test]
    fn test_validation_cycle_equal_to_morning_ok() {
        let mut env = minimal_valid_env();
        env.insert("OFF_PEAK_START_HOUR", "20");
        env.insert("OFF_PEAK_END_HOUR", "4");
        env.insert("MAX_CYCLE_DURATION_HOURS", "4");
        let config = Config::from_map(&env).expect("should parse");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_delay_longer_than_a_day() {
        // 22 + 7 - 1: a 1h start would be told to wait 28 hours
        let mut env = minimal_valid_env();
        env.insert("MAX_CYCLE_DURATION_HOURS", "7");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("delayed start of 28 hours"), "{}", err);

        // 22 + 5 - 3 = 24 is still one hour too many
        env.insert("MAX_CYCLE_DURATION_HOURS", "5");
        assert!(Config::from_map(&env).unwrap().validate().is_err());

        env.insert("MAX_CYCLE_DURATION_HOURS", "4");
        assert!(Config::from_map(&env).unwrap().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_intervals() {
        let mut env = minimal_valid_env();
        env.insert("POLL_INTERVAL_SECS", "0");
        env.insert("SINK_TIMEOUT_SECS", "0");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("POLL_INTERVAL_SECS"));
        assert!(err.contains("SINK_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut env = full_env();
        env.insert("OFF_PEAK_START_HOUR", "30");
        env.insert("HA_PROTOCOL", "ftp");
        env.insert("MQTT_KEEPALIVE_SECS", "1");
        env.insert("MQTT_TOPIC", "badger/#");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("OFF_PEAK_START_HOUR"));
        assert!(err.contains("HA_PROTOCOL"));
        assert!(err.contains("MQTT_KEEPALIVE_SECS"));
        assert!(err.contains("MQTT_TOPIC"));
    }

    #[test]
    fn test_validation_hostname_is_not_url() {
        let mut env = minimal_valid_env();
        env.insert("HA_HOSTNAME", "http://ha.local/");
        let config = Config::from_map(&env).expect("should parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_health_port() {
        let mut env = minimal_valid_env();
        env.insert("HEALTH_PORT", "8080");
        assert_eq!(Config::from_map(&env).unwrap().health_port, Some(8080));

        env.insert("HEALTH_PORT", "http");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn test_parse_transitions_offsets() {
        let entries = parse_transitions("100:-5,200:-4,").unwrap();
        assert_eq!(entries, vec![Transition::new(100, -5), Transition::new(200, -4)]);
        assert!(parse_transitions("100:20").is_err());
        assert!(parse_transitions("abc:1").is_err());
    }

    #[test]
    fn test_timezone_source_build() {
        let now = 1712000000;
        assert_eq!(
            TimezoneSource::Builtin.build(now).unwrap(),
            TransitionTable::builtin()
        );
        let zone = TimezoneSource::Zone {
            tz: chrono_tz::Europe::Brussels,
            horizon_years: 1,
        };
        let table = zone.build(now).unwrap();
        assert_eq!(table.resolve_offset(now), Ok(7200));
        assert!(TimezoneSource::Transitions(vec![]).build(now).is_err());
    }
}
