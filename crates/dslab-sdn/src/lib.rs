#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod builders;
pub mod channel;
pub mod channel_manager;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod link;
pub mod link_selection;
pub mod mapper;
pub mod monitor;
pub mod node;
pub mod nos;
pub mod routing;
pub mod scheduler;
pub mod topology;
pub mod transmission;
pub mod vm_allocation;

pub use channel::{Channel, ChannelKey};
pub use channel_manager::ChannelManager;
pub use config::SdnConfig;
pub use error::{Result, SdnError};
pub use events::{TransmissionCompleted, TransmissionFailed};
pub use flow::{FlowConfig, FlowId, SdnRegistry, SfcPolicy, VmId, VmInfo, DEFAULT_FLOW_ID};
pub use link::{Direction, Link, LinkId};
pub use mapper::{Path, VirtualNetworkMapper};
pub use monitor::{NetworkMonitor, NetworkStats};
pub use node::{Node, NodeId, NodeKind, SwitchTier};
pub use nos::NetworkOperatingSystem;
pub use topology::{PhysicalTopology, TopologyKind};
pub use transmission::{Packet, Transmission};
pub use vm_allocation::{StaticVmAllocation, VmAllocationPolicy};
