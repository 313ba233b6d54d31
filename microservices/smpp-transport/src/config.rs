//! SMPP transport configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::correlation::CorrelationTtls;
use crate::encoding::{is_known_encoding, UndecodablePolicy};
use crate::error::{Result, TransportError};
use crate::fragment::{FragmentationStrategy, DEFAULT_CSM_SPLIT_LENGTH};
use crate::reconnect::ReconnectPolicy;
use crate::session::{BindCredentials, BindRole};

/// Complete transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmppTransportConfig {
    /// Name stamped on inbound messages and used in the key namespace
    pub transport_name: String,
    /// SMSC address, `host:port`
    pub endpoint: String,
    pub bind: BindConfig,
    /// Overrides the `<system_id>@<transport_name>` key namespace
    pub split_bind_prefix: Option<String>,
    pub submit: SubmitConfig,
    pub inbound: InboundConfig,
    pub ttl: TtlConfig,
    /// Cooldown before retrying a throttled message (ms)
    pub throttle_delay_ms: u64,
    pub enquire_link_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub role: BindRole,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// submit_sm construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Encoding label for outbound text
    pub encoding: String,
    pub data_coding: u8,
    pub fragmentation: FragmentationStrategy,
    /// Octets per segment for `sar` and `udh`
    pub csm_split_length: usize,
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub registered_delivery: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Encoding for data_coding 0
    pub default_encoding: String,
    pub undecodable_content: UndecodablePolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub sequence_secs: u64,
    pub remote_id_secs: u64,
    pub cached_message_secs: u64,
}

impl Default for SmppTransportConfig {
    fn default() -> Self {
        Self {
            transport_name: "smpp_transport".to_string(),
            endpoint: "127.0.0.1:2775".to_string(),
            bind: BindConfig::default(),
            split_bind_prefix: None,
            submit: SubmitConfig::default(),
            inbound: InboundConfig::default(),
            ttl: TtlConfig::default(),
            throttle_delay_ms: 100,
            enquire_link_interval_secs: 55,
            connect_timeout_secs: 10,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            data_coding: 0,
            fragmentation: FragmentationStrategy::Plain,
            csm_split_length: DEFAULT_CSM_SPLIT_LENGTH,
            service_type: String::new(),
            source_addr_ton: 0,
            source_addr_npi: 0,
            dest_addr_ton: 0,
            dest_addr_npi: 0,
            registered_delivery: 1,
        }
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            default_encoding: "utf-8".to_string(),
            undecodable_content: UndecodablePolicy::Hex,
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        let ttls = CorrelationTtls::default();
        Self {
            sequence_secs: ttls.sequence.as_secs(),
            remote_id_secs: ttls.remote_id.as_secs(),
            cached_message_secs: ttls.cached_message.as_secs(),
        }
    }
}

impl TtlConfig {
    pub fn correlation_ttls(&self) -> CorrelationTtls {
        CorrelationTtls {
            sequence: Duration::from_secs(self.sequence_secs),
            remote_id: Duration::from_secs(self.remote_id_secs),
            cached_message: Duration::from_secs(self.cached_message_secs),
        }
    }
}

impl BindConfig {
    pub fn credentials(&self) -> BindCredentials {
        BindCredentials {
            system_id: self.system_id.clone(),
            password: self.password.clone(),
            system_type: self.system_type.clone(),
            addr_ton: self.addr_ton,
            addr_npi: self.addr_npi,
            address_range: self.address_range.clone(),
        }
    }
}

impl SmppTransportConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransportError::Config(format!("{}: {}", path, e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| TransportError::Config(format!("{}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source, defaults for anything unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let mut config = Self::default();
        if let Some(v) = var("TRANSPORT_NAME") {
            config.transport_name = v;
        }
        if let Some(v) = var("SMPP_ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = var("SMPP_SYSTEM_ID") {
            config.bind.system_id = v;
        }
        if let Some(v) = var("SMPP_PASSWORD") {
            config.bind.password = v;
        }
        if let Some(v) = var("SMPP_SYSTEM_TYPE") {
            config.bind.system_type = v;
        }
        if let Some(v) = var("SMPP_BIND_ROLE") {
            config.bind.role = v.parse()?;
        }
        config.split_bind_prefix = var("SMPP_SPLIT_BIND_PREFIX");
        if let Some(v) = var("SMPP_SUBMIT_ENCODING") {
            config.submit.encoding = v;
        }
        if let Some(v) = var("SMPP_SUBMIT_DATA_CODING") {
            config.submit.data_coding = parse_value("SMPP_SUBMIT_DATA_CODING", &v)?;
        }
        if let Some(v) = var("SMPP_FRAGMENTATION") {
            config.submit.fragmentation = v.parse()?;
        }
        if let Some(v) = var("SMPP_CSM_SPLIT_LENGTH") {
            config.submit.csm_split_length = parse_value("SMPP_CSM_SPLIT_LENGTH", &v)?;
        }
        if let Some(v) = var("SMPP_DELIVER_ENCODING") {
            config.inbound.default_encoding = v;
        }
        if let Some(v) = var("SMPP_UNDECODABLE_CONTENT") {
            config.inbound.undecodable_content = v.parse()?;
        }
        if let Some(v) = var("SMPP_THIRD_PARTY_ID_EXPIRY") {
            let secs = parse_value("SMPP_THIRD_PARTY_ID_EXPIRY", &v)?;
            config.ttl.sequence_secs = secs;
            config.ttl.remote_id_secs = secs;
        }
        if let Some(v) = var("SMPP_SUBMIT_SM_EXPIRY") {
            config.ttl.cached_message_secs = parse_value("SMPP_SUBMIT_SM_EXPIRY", &v)?;
        }
        if let Some(v) = var("SMPP_THROTTLE_DELAY_MS") {
            config.throttle_delay_ms = parse_value("SMPP_THROTTLE_DELAY_MS", &v)?;
        }
        if let Some(v) = var("SMPP_ENQUIRE_LINK_INTERVAL") {
            config.enquire_link_interval_secs = parse_value("SMPP_ENQUIRE_LINK_INTERVAL", &v)?;
        }
        if let Some(v) = var("SMPP_CONNECT_TIMEOUT") {
            config.connect_timeout_secs = parse_value("SMPP_CONNECT_TIMEOUT", &v)?;
        }
        if let Some(v) = var("SMPP_RECONNECT_INITIAL_DELAY_MS") {
            config.reconnect.initial_delay_ms = parse_value("SMPP_RECONNECT_INITIAL_DELAY_MS", &v)?;
        }
        if let Some(v) = var("SMPP_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = parse_value("SMPP_RECONNECT_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = var("SMPP_RECONNECT_FACTOR") {
            config.reconnect.factor = parse_value("SMPP_RECONNECT_FACTOR", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(TransportError::Config("endpoint must be set".into()));
        }
        if self.transport_name.is_empty() {
            return Err(TransportError::Config("transport_name must be set".into()));
        }
        if !is_known_encoding(&self.submit.encoding) {
            return Err(TransportError::Config(format!(
                "Unknown submit encoding {:?}",
                self.submit.encoding
            )));
        }
        if !is_known_encoding(&self.inbound.default_encoding) {
            return Err(TransportError::Config(format!(
                "Unknown deliver encoding {:?}",
                self.inbound.default_encoding
            )));
        }
        let max_split = match self.submit.fragmentation {
            // 6 octets of every segment go to the UDH
            FragmentationStrategy::Udh => 254 - 6,
            _ => 254,
        };
        if self.submit.csm_split_length == 0 || self.submit.csm_split_length > max_split {
            return Err(TransportError::Config(format!(
                "csm_split_length must be between 1 and {}",
                max_split
            )));
        }
        if self.reconnect.factor < 1.0 {
            return Err(TransportError::Config("reconnect factor must be at least 1.0".into()));
        }
        if self.enquire_link_interval_secs == 0 {
            return Err(TransportError::Config("enquire_link_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Prefix for every correlation key of this instance
    pub fn namespace(&self) -> String {
        match &self.split_bind_prefix {
            Some(prefix) if !prefix.is_empty() => prefix.clone(),
            _ => format!("{}@{}", self.bind.system_id, self.transport_name),
        }
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    pub fn enquire_link_interval(&self) -> Duration {
        Duration::from_secs(self.enquire_link_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| TransportError::Config(format!("Invalid {} {:?}: {}", name, value, e)))
}
