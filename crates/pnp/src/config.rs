//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use flowctl::{QUEUE_ID_COUNT, QueueId};
use protocol::LOADER_SERVICE_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub pnp: PnpSettings,
    #[serde(default)]
    pub flow_control: FlowControlSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Default log filter when RUST_LOG is unset
    #[serde(default = "DaemonSettings::default_log_level")]
    pub log_level: String,
    /// Enumerate already-attached devices toward the loader at startup
    #[serde(default)]
    pub report_on_start: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            report_on_start: false,
        }
    }
}

impl DaemonSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnpSettings {
    /// Name the notifier dispatches to and the loader answers for
    #[serde(default = "PnpSettings::default_loader_service")]
    pub loader_service: String,
    /// Match rules evaluated by the loader, in configuration order
    #[serde(default)]
    pub match_rules: Vec<MatchRule>,
}

impl Default for PnpSettings {
    fn default() -> Self {
        Self {
            loader_service: Self::default_loader_service(),
            match_rules: Vec::new(),
        }
    }
}

impl PnpSettings {
    fn default_loader_service() -> String {
        LOADER_SERVICE_NAME.to_string()
    }
}

/// One configured match rule
///
/// Device-level fields are optional pins: `Some(v)` requires the snapshot
/// field to equal `v`, absent means wildcard. The bcdDevice bounds pin each
/// end of the revision range independently. Interface-selector arrays list
/// acceptable values; an empty array is a wildcard.
///
/// # Example Configuration
/// ```toml
/// [[pnp.match_rules]]
/// module_name = "usb_mass_storage"
/// service_name = "usbfn_mass_storage"
/// vendor_id = 0x12d1
/// interface_class = [0x08]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRule {
    /// Driver module to load on a match
    pub module_name: String,
    /// Service name the downstream device registers under
    pub service_name: String,
    /// Private match attribute forwarded to the driver
    #[serde(default)]
    pub device_match_attr: String,

    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    /// Lower bound on the device's bcdDevice revision
    #[serde(default)]
    pub bcd_device_low: Option<u16>,
    /// Upper bound on the device's bcdDevice revision
    #[serde(default)]
    pub bcd_device_high: Option<u16>,
    #[serde(default)]
    pub device_class: Option<u8>,
    #[serde(default)]
    pub device_sub_class: Option<u8>,
    #[serde(default)]
    pub device_protocol: Option<u8>,

    #[serde(default)]
    pub interface_class: Vec<u8>,
    #[serde(default)]
    pub interface_sub_class: Vec<u8>,
    #[serde(default)]
    pub interface_protocol: Vec<u8>,
    #[serde(default)]
    pub interface_number: Vec<u8>,
}

impl MatchRule {
    /// True when any interface-selector array is populated
    pub fn needs_interface_match(&self) -> bool {
        !self.interface_class.is_empty()
            || !self.interface_sub_class.is_empty()
            || !self.interface_protocol.is_empty()
            || !self.interface_number.is_empty()
    }
}

/// Flow-control queue depths and device role
///
/// Consumed by hosts embedding the flow-control engine next to the PnP
/// pipeline; the daemon only validates it. A zero threshold leaves that
/// class unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowControlSettings {
    /// Device role, `"sta"` (station/P2P client) or `"ap"`
    #[serde(default = "FlowControlSettings::default_role")]
    pub role: String,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub ctrl_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub vip_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub normal_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub tcp_data_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub tcp_ack_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub bk_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub be_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub vi_threshold: usize,
    #[serde(default = "FlowControlSettings::default_threshold")]
    pub vo_threshold: usize,
}

impl Default for FlowControlSettings {
    fn default() -> Self {
        Self {
            role: Self::default_role(),
            ctrl_threshold: Self::default_threshold(),
            vip_threshold: Self::default_threshold(),
            normal_threshold: Self::default_threshold(),
            tcp_data_threshold: Self::default_threshold(),
            tcp_ack_threshold: Self::default_threshold(),
            bk_threshold: Self::default_threshold(),
            be_threshold: Self::default_threshold(),
            vi_threshold: Self::default_threshold(),
            vo_threshold: Self::default_threshold(),
        }
    }
}

impl FlowControlSettings {
    fn default_role() -> String {
        "sta".to_string()
    }

    fn default_threshold() -> usize {
        64
    }

    pub fn is_sta(&self) -> bool {
        self.role == "sta"
    }

    /// Per-class thresholds indexed by traffic class
    pub fn thresholds(&self) -> [usize; QUEUE_ID_COUNT] {
        let mut thresholds = [0; QUEUE_ID_COUNT];
        thresholds[QueueId::Ctrl.index()] = self.ctrl_threshold;
        thresholds[QueueId::Vip.index()] = self.vip_threshold;
        thresholds[QueueId::Normal.index()] = self.normal_threshold;
        thresholds[QueueId::TcpData.index()] = self.tcp_data_threshold;
        thresholds[QueueId::TcpAck.index()] = self.tcp_ack_threshold;
        thresholds[QueueId::Bk.index()] = self.bk_threshold;
        thresholds[QueueId::Be.index()] = self.be_threshold;
        thresholds[QueueId::Vi.index()] = self.vi_threshold;
        thresholds[QueueId::Vo.index()] = self.vo_threshold;
        thresholds
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings::default(),
            pnp: PnpSettings::default(),
            flow_control: FlowControlSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-pnp-hub/usb-pnpd.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-pnp-hub").join("usb-pnpd.toml")
        } else {
            PathBuf::from(".config/usb-pnp-hub/usb-pnpd.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.pnp.loader_service.is_empty() {
            return Err(anyhow!("Loader service name must not be empty"));
        }

        for (index, rule) in self.pnp.match_rules.iter().enumerate() {
            if rule.module_name.is_empty() {
                return Err(anyhow!("Match rule {} has an empty module_name", index));
            }
            if rule.service_name.is_empty() {
                return Err(anyhow!("Match rule {} has an empty service_name", index));
            }
        }

        let valid_roles = ["sta", "ap"];
        if !valid_roles.contains(&self.flow_control.role.as_str()) {
            return Err(anyhow!(
                "Invalid flow-control role '{}', must be one of: {}",
                self.flow_control.role,
                valid_roles.join(", ")
            ));
        }

        Ok(())
    }
}
