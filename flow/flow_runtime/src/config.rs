//! Deployment configuration, read once at startup.

use crate::devmode::DevModeConfig;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;

/// Messages shown by the client when the session is gone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemMessages {
    pub session_expired_url: Option<String>,
    pub session_expired_notification_enabled: bool,
}

impl Default for SystemMessages {
    fn default() -> Self {
        Self {
            session_expired_url: None,
            session_expired_notification_enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct I18nConfiguration {
    pub provider: Option<String>,
    pub default_locale: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DeploymentConfiguration {
    pub production_mode: bool,
    pub sync_id_check_enabled: bool,
    pub request_timing: bool,
    pub session_max_inactive_interval: Option<Duration>,
    pub system_messages: SystemMessages,
    pub i18n: I18nConfiguration,
    pub dev_server: Option<DevModeConfig>,
    /// Capacity of the queue feeding the transport writer thread.
    pub outbound_queue_cap: usize,
}

impl Default for DeploymentConfiguration {
    fn default() -> Self {
        Self {
            production_mode: false,
            sync_id_check_enabled: true,
            request_timing: true,
            session_max_inactive_interval: None,
            system_messages: SystemMessages::default(),
            i18n: I18nConfiguration::default(),
            dev_server: None,
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
        }
    }
}

impl DeploymentConfiguration {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let production_mode = parse_bool(&lookup, "FLOW_PRODUCTION_MODE")?.unwrap_or(false);
        let sync_id_check_enabled = parse_bool(&lookup, "FLOW_SYNC_ID_CHECK")?.unwrap_or(true);
        let request_timing = parse_bool(&lookup, "FLOW_REQUEST_TIMING")?.unwrap_or(!production_mode);
        let session_max_inactive_interval =
            parse_u64(&lookup, "FLOW_SESSION_TIMEOUT_SECS")?.map(Duration::from_secs);

        let system_messages = SystemMessages {
            session_expired_url: non_blank(lookup("FLOW_SESSION_EXPIRED_URL")),
            session_expired_notification_enabled: parse_bool(&lookup, "FLOW_SESSION_EXPIRED_NOTIFICATION")?
                .unwrap_or(true),
        };

        let i18n = I18nConfiguration {
            provider: lookup("FLOW_I18N_PROVIDER"),
            default_locale: lookup("FLOW_I18N_DEFAULT_LOCALE"),
        };

        let dev_server = match (production_mode, lookup("FLOW_DEV_SERVER_COMMAND")) {
            (false, Some(command)) if !command.trim().is_empty() => {
                Some(dev_server_config(&lookup, &command)?)
            }
            _ => None,
        };

        // A bad capacity is not worth refusing to start over.
        let outbound_queue_cap = lookup("FLOW_OUTBOUND_QUEUE_CAP")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAP);

        Ok(Self {
            production_mode,
            sync_id_check_enabled,
            request_timing,
            session_max_inactive_interval,
            system_messages,
            i18n,
            dev_server,
            outbound_queue_cap,
        })
    }

    /// Startup validation. `known_i18n_providers` lists the providers the
    /// application registered.
    pub fn validate(&self, known_i18n_providers: &[&str]) -> Result<(), ConfigError> {
        if let Some(provider) = &self.i18n.provider {
            if provider.trim().is_empty() {
                return Err(ConfigError::InvalidI18nConfiguration(
                    "I18N provider name is blank".to_string(),
                ));
            }
            if !known_i18n_providers.contains(&provider.as_str()) {
                return Err(ConfigError::InvalidI18nConfiguration(format!(
                    "I18N provider '{provider}' is not registered"
                )));
            }
        }

        if let Some(locale) = &self.i18n.default_locale {
            if !is_language_tag(locale) {
                return Err(ConfigError::InvalidI18nConfiguration(format!(
                    "default locale '{locale}' is not a valid language tag"
                )));
            }
        }

        Ok(())
    }
}

fn dev_server_config(
    lookup: &impl Fn(&str) -> Option<String>,
    command: &str,
) -> Result<DevModeConfig, ConfigError> {
    let mut config = DevModeConfig::new(command.split_whitespace().map(str::to_string).collect());

    if let Some(path) = non_blank(lookup("FLOW_DEV_SERVER_PORT_FILE")) {
        config.port_file = PathBuf::from(path);
    }
    if let Some(dir) = non_blank(lookup("FLOW_DEV_SERVER_DIR")) {
        config.working_dir = Some(PathBuf::from(dir));
    }
    if let Some(reuse) = parse_bool(lookup, "FLOW_DEV_SERVER_REUSE")? {
        config.reuse_dev_server = reuse;
    }
    if let Some(prefix) = non_blank(lookup("FLOW_DEV_SERVER_PATH_PREFIX")) {
        config.path_prefix = prefix;
    }
    if let Some(timeout) = parse_u64(lookup, "FLOW_DEV_SERVER_TIMEOUT_MS")? {
        config.start_timeout = Duration::from_millis(timeout);
    }

    Ok(config)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = non_blank(lookup(key)) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = non_blank(lookup(key)) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

/// Accepts `ll`, `lll`, `ll-CC`, `ll-Script` and `ll-Script-CC` shapes.
fn is_language_tag(tag: &str) -> bool {
    let mut parts = tag.split(['-', '_']);
    let Some(language) = parts.next() else {
        return false;
    };
    if !(2..=3).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }

    let rest: Vec<&str> = parts.collect();
    if rest.len() > 2 {
        return false;
    }
    rest.iter().enumerate().all(|(index, part)| {
        let is_script = part.len() == 4 && part.chars().all(|c| c.is_ascii_alphabetic());
        let is_region = (part.len() == 2 && part.chars().all(|c| c.is_ascii_alphabetic()))
            || (part.len() == 3 && part.chars().all(|c| c.is_ascii_digit()));
        match (index, rest.len()) {
            (0, 2) => is_script,
            (_, _) => is_region || (index == 0 && is_script),
        }
    })
}
