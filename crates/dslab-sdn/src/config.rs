//! Network configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdnError};
use crate::link_selection::LinkSelection;
use crate::scheduler::SchedulerKind;
use crate::topology::TopologyKind;

/// Holds raw config parsed from YAML.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawSdnConfig {
    pub min_time_between_events: Option<f64>,
    pub monitoring_interval: Option<f64>,
    pub dynamic_routing: Option<bool>,
    pub packet_scheduler: Option<SchedulerKind>,
    pub link_selection: Option<LinkSelection>,
    pub transmission_timeout: Option<f64>,
    pub topology: Option<TopologyKind>,
}

/// Represents configuration of the network operating system.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SdnConfig {
    /// Minimum delay between channel re-evaluations.
    pub min_time_between_events: f64,
    /// Period of link and channel monitoring, 0 disables monitoring.
    pub monitoring_interval: f64,
    /// Whether paths of flows are re-evaluated when channels are created or change bandwidth.
    pub dynamic_routing: bool,
    /// Packet scheduler used by channels.
    pub packet_scheduler: SchedulerKind,
    /// Policy choosing among routing candidates.
    pub link_selection: LinkSelection,
    /// Timeout applied to packets without their own.
    pub transmission_timeout: Option<f64>,
    /// Topology variant used to build routing tables.
    pub topology: TopologyKind,
}

impl SdnConfig {
    /// Creates config from YAML file.
    pub fn from_file(file_name: &str) -> Result<Self> {
        let data = std::fs::read_to_string(file_name)
            .map_err(|e| SdnError::Config(format!("can't read file {}: {}", file_name, e)))?;
        Self::from_str(&data)
    }

    /// Creates config from YAML string, absent keys take default values.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self> {
        let raw: RawSdnConfig = if data.trim().is_empty() {
            RawSdnConfig::default()
        } else {
            serde_yaml::from_str(data).map_err(|e| SdnError::Config(format!("can't parse YAML: {}", e)))?
        };
        let config = Self::from_raw(raw);
        if config.min_time_between_events < 0. || config.monitoring_interval < 0. {
            return Err(SdnError::Config("time intervals must be non-negative".to_string()));
        }
        Ok(config)
    }

    fn from_raw(raw: RawSdnConfig) -> Self {
        Self {
            min_time_between_events: raw.min_time_between_events.unwrap_or(0.001),
            monitoring_interval: raw.monitoring_interval.unwrap_or(0.),
            dynamic_routing: raw.dynamic_routing.unwrap_or(false),
            packet_scheduler: raw.packet_scheduler.unwrap_or(SchedulerKind::TimeShared),
            link_selection: raw.link_selection.unwrap_or(LinkSelection::DestinationAddress),
            transmission_timeout: raw.transmission_timeout,
            topology: raw.topology.unwrap_or(TopologyKind::FatTree),
        }
    }
}

impl Default for SdnConfig {
    fn default() -> Self {
        Self::from_raw(RawSdnConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SdnConfig::from_str("").unwrap();
        assert_eq!(config, SdnConfig::default());
        assert_eq!(config.min_time_between_events, 0.001);
        assert_eq!(config.packet_scheduler, SchedulerKind::TimeShared);
        assert_eq!(config.link_selection, LinkSelection::DestinationAddress);
        assert_eq!(config.topology, TopologyKind::FatTree);
        assert!(!config.dynamic_routing);
    }

    #[test]
    fn parse_yaml() {
        let config = SdnConfig::from_str(
            "
min_time_between_events: 0.01
monitoring_interval: 5
dynamic_routing: true
packet_scheduler: space-shared
link_selection: bandwidth-allocation
transmission_timeout: 30
topology: inter-cloud
",
        )
        .unwrap();
        assert_eq!(config.min_time_between_events, 0.01);
        assert_eq!(config.monitoring_interval, 5.);
        assert!(config.dynamic_routing);
        assert_eq!(config.packet_scheduler, SchedulerKind::SpaceShared);
        assert_eq!(config.link_selection, LinkSelection::BandwidthAllocation);
        assert_eq!(config.transmission_timeout, Some(30.));
        assert_eq!(config.topology, TopologyKind::InterCloud);
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            SdnConfig::from_str("packet_scheduler: round-robin"),
            Err(SdnError::Config(_))
        ));
        assert!(matches!(
            SdnConfig::from_str("monitoring_interval: -1"),
            Err(SdnError::Config(_))
        ));
        assert!(matches!(SdnConfig::from_file("missing.yaml"), Err(SdnError::Config(_))));
    }
}
