use crate::{DeliveryMode, PurchaseError, Result, ServiceConfig, VenueSettings};
use config::{Config, ConfigError, Environment};
use java_properties::PropertiesIter;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Prefix for environment overrides, e.g. `PURCHASE__OUTBOX__PAGE_SIZE=50`.
pub const ENV_PREFIX: &str = "PURCHASE";

/// Parse Java properties file into ServiceConfig
pub fn parse_properties_file<P: AsRef<Path>>(path: P, application_id: &str) -> Result<ServiceConfig> {
    let properties = read_properties(path.as_ref())?;
    let mut config = ServiceConfig::new(application_id);
    apply_properties(&mut config, properties)?;
    config.validate()?;
    Ok(config)
}

/// Parse a second properties file and layer it over an existing config
pub fn merge_properties_file<P: AsRef<Path>>(mut config: ServiceConfig, path: P) -> Result<ServiceConfig> {
    let properties = read_properties(path.as_ref())?;
    apply_properties(&mut config, properties)?;
    config.validate()?;
    Ok(config)
}

/// Apply `PURCHASE__SECTION__KEY` environment variables on top of file settings.
pub fn apply_env_overrides(mut config: ServiceConfig) -> Result<ServiceConfig> {
    let settings = Config::builder()
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    if let Some(v) = lookup::<String>(&settings, "kafka.bootstrap_servers")? {
        config.kafka.bootstrap_servers = v;
    }
    if let Some(v) = lookup::<String>(&settings, "state_dir")? {
        config.state_dir = v;
    }
    if let Some(v) = lookup::<u64>(&settings, "outbox.poll_interval_ms")? {
        config.outbox.poll_interval_ms = v;
    }
    if let Some(v) = lookup::<usize>(&settings, "outbox.page_size")? {
        config.outbox.page_size = v;
    }
    if let Some(v) = lookup::<u32>(&settings, "outbox.max_attempts")? {
        config.outbox.max_attempts = v;
    }
    if let Some(v) = lookup::<u64>(&settings, "outbox.max_backoff_secs")? {
        config.outbox.max_backoff_secs = v;
    }
    if let Some(v) = lookup::<String>(&settings, "outbox.topic")? {
        config.outbox.topic = v;
    }
    if let Some(v) = lookup::<String>(&settings, "purchase.delivery_mode")? {
        config.purchase.delivery_mode = v.parse()?;
    }
    if let Some(v) = lookup::<u32>(&settings, "purchase.release_max_attempts")? {
        config.purchase.release_max_attempts = v;
    }

    config.validate()?;
    Ok(config)
}

fn lookup<T: DeserializeOwned>(settings: &Config, key: &str) -> Result<Option<T>> {
    match settings.get::<T>(key) {
        Ok(value) => {
            debug!("Environment override applied for '{}'", key);
            Ok(Some(value))
        }
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_properties(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).map_err(|e| {
        PurchaseError::InvalidArgument(format!("Failed to open config file {:?}: {}", path, e))
    })?;

    let reader = BufReader::new(file);
    PropertiesIter::new(reader)
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| PurchaseError::InvalidArgument(format!("Failed to parse properties: {}", e)))
}

#[derive(Default)]
struct PartialVenue {
    zone_count: Option<u32>,
    row_count: Option<u32>,
    col_count: Option<u32>,
}

impl PartialVenue {
    fn from_settings(settings: &VenueSettings) -> Self {
        Self {
            zone_count: Some(settings.zone_count),
            row_count: Some(settings.row_count),
            col_count: Some(settings.col_count),
        }
    }

    fn finish(self, venue_id: &str) -> Result<VenueSettings> {
        let require = |value: Option<u32>, field: &str| match value {
            Some(v) if v >= 1 => Ok(v),
            Some(_) => Err(PurchaseError::InvalidArgument(format!(
                "venues.{}.{} must be at least 1",
                venue_id, field
            ))),
            None => Err(PurchaseError::InvalidArgument(format!(
                "venues.{}.{} is missing",
                venue_id, field
            ))),
        };

        Ok(VenueSettings {
            zone_count: require(self.zone_count, "zone.count")?,
            row_count: require(self.row_count, "row.count")?,
            col_count: require(self.col_count, "col.count")?,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        PurchaseError::InvalidArgument(format!("Invalid numeric value for {}: {}", key, value))
    })
}

fn apply_properties(config: &mut ServiceConfig, properties: HashMap<String, String>) -> Result<()> {
    let mut venues: HashMap<String, PartialVenue> = HashMap::new();

    for (key, value) in properties {
        match key.as_str() {
            "bootstrap.servers" => config.kafka.bootstrap_servers = value,
            "security.protocol" => config.kafka.security_protocol = Some(value),
            "sasl.mechanism" => config.kafka.sasl_mechanism = Some(value),
            "sasl.username" => config.kafka.sasl_username = Some(value),
            "sasl.password" => config.kafka.sasl_password = Some(value),
            "ssl.ca.location" => config.kafka.ssl_ca_location = Some(value),
            "state.dir" => config.state_dir = value,
            "outbox.poll.interval.ms" => config.outbox.poll_interval_ms = parse_number(&key, &value)?,
            "outbox.page.size" => config.outbox.page_size = parse_number(&key, &value)?,
            "outbox.max.attempts" => config.outbox.max_attempts = parse_number(&key, &value)?,
            "outbox.max.backoff.secs" => config.outbox.max_backoff_secs = parse_number(&key, &value)?,
            "outbox.topic" => config.outbox.topic = value,
            "purchase.delivery.mode" => config.purchase.delivery_mode = value.parse::<DeliveryMode>()?,
            "purchase.dead.letter.topic" => config.purchase.dead_letter_topic = Some(value),
            "purchase.release.max.attempts" => {
                config.purchase.release_max_attempts = parse_number(&key, &value)?
            }
            _ if key.starts_with("venues.") => {
                let rest = &key["venues.".len()..];
                let (venue_id, field) = rest.split_once('.').ok_or_else(|| {
                    PurchaseError::InvalidArgument(format!("Malformed venue property: {}", key))
                })?;

                let existing = if venue_id == "default" {
                    config.venues.default_layout.as_ref()
                } else {
                    config.venues.venues.get(venue_id)
                };
                let partial = venues
                    .entry(venue_id.to_string())
                    .or_insert_with(|| existing.map(PartialVenue::from_settings).unwrap_or_default());

                match field {
                    "zone.count" => partial.zone_count = Some(parse_number(&key, &value)?),
                    "row.count" => partial.row_count = Some(parse_number(&key, &value)?),
                    "col.count" => partial.col_count = Some(parse_number(&key, &value)?),
                    _ => {
                        return Err(PurchaseError::InvalidArgument(format!(
                            "Unknown venue property: {}",
                            key
                        )))
                    }
                }
            }
            _ => {
                config.kafka.additional_properties.insert(key, value);
            }
        }
    }

    for (venue_id, partial) in venues {
        let settings = partial.finish(&venue_id)?;
        if venue_id == "default" {
            config.venues.default_layout = Some(settings);
        } else {
            config.venues.venues.insert(venue_id, settings);
        }
    }

    Ok(())
}
