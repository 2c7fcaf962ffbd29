//! Virtual machines, virtual flows and the registry shared between network operating systems.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Unique VM id.
pub type VmId = u32;

/// Virtual flow id.
pub type FlowId = i32;

/// Flow id of the default (best-effort) flow between two VMs.
pub const DEFAULT_FLOW_ID: FlowId = -1;

/// Virtual machine (or service function) descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmInfo {
    /// VM id.
    pub id: VmId,
    /// VM name.
    pub name: String,
    /// Datacenter the VM is deployed to.
    pub datacenter: Option<String>,
}

impl VmInfo {
    /// Creates a VM descriptor without datacenter binding.
    pub fn new(id: VmId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            datacenter: None,
        }
    }
}

/// Virtual link between two VMs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow id, [`DEFAULT_FLOW_ID`] for the default flow.
    pub id: FlowId,
    /// Flow name.
    pub name: String,
    /// Source VM.
    pub src: VmId,
    /// Destination VM.
    pub dst: VmId,
    /// Requested bandwidth.
    pub bandwidth: f64,
    /// Requested latency.
    pub latency: Option<f64>,
}

impl FlowConfig {
    /// Creates a flow without latency requirement.
    pub fn new(id: FlowId, name: &str, src: VmId, dst: VmId, bandwidth: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            src,
            dst,
            bandwidth,
            latency: None,
        }
    }

    /// Returns true if the flow has dedicated bandwidth.
    pub fn is_dedicated(&self) -> bool {
        self.id != DEFAULT_FLOW_ID
    }
}

/// Service function chain policy.
///
/// Stored for consumers implementing chaining on top of the network, the network itself only keeps it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SfcPolicy {
    /// Policy name.
    pub name: String,
    /// Source VM of the chained traffic.
    pub src: VmId,
    /// Destination VM of the chained traffic.
    pub dst: VmId,
    /// Flow the policy applies to.
    pub flow: FlowId,
    /// Service functions (VMs) the traffic must traverse, in order.
    pub chain: Vec<VmId>,
    /// Expected end-to-end time of the chained traffic.
    pub expected_time: Option<f64>,
}

/// Registry of VMs, flows and SFC policies.
///
/// A single registry is shared by reference between all network operating systems of a simulation,
/// so that flows spanning several datacenters are resolved consistently.
#[derive(Default, Debug)]
pub struct SdnRegistry {
    vms: IndexMap<VmId, VmInfo>,
    flows: IndexMap<FlowId, FlowConfig>,
    flow_names: FxHashMap<String, FlowId>,
    sfc_policies: IndexMap<String, SfcPolicy>,
}

impl SdnRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers VM, replacing previous descriptor with the same id.
    pub fn add_vm(&mut self, vm: VmInfo) {
        self.vms.insert(vm.id, vm);
    }

    /// Removes VM descriptor.
    pub fn remove_vm(&mut self, vm: VmId) -> Option<VmInfo> {
        self.vms.shift_remove(&vm)
    }

    /// Returns VM descriptor.
    pub fn vm(&self, vm: VmId) -> Option<&VmInfo> {
        self.vms.get(&vm)
    }

    /// Returns VM descriptor by name.
    pub fn vm_by_name(&self, name: &str) -> Option<&VmInfo> {
        self.vms.values().find(|vm| vm.name == name)
    }

    /// Returns all registered VMs.
    pub fn vms(&self) -> impl Iterator<Item = &VmInfo> {
        self.vms.values()
    }

    /// Registers flow, replacing previous flow with the same id.
    pub fn add_flow(&mut self, flow: FlowConfig) {
        if let Some(old) = self.flows.get(&flow.id) {
            self.flow_names.remove(&old.name);
        }
        self.flow_names.insert(flow.name.clone(), flow.id);
        self.flows.insert(flow.id, flow);
    }

    /// Removes flow.
    pub fn remove_flow(&mut self, flow: FlowId) -> Option<FlowConfig> {
        let removed = self.flows.shift_remove(&flow);
        if let Some(config) = &removed {
            self.flow_names.remove(&config.name);
        }
        removed
    }

    /// Returns flow by id.
    pub fn flow(&self, flow: FlowId) -> Option<&FlowConfig> {
        self.flows.get(&flow)
    }

    /// Returns mutable flow by id.
    pub fn flow_mut(&mut self, flow: FlowId) -> Option<&mut FlowConfig> {
        self.flows.get_mut(&flow)
    }

    /// Returns flow by name.
    pub fn flow_by_name(&self, name: &str) -> Option<&FlowConfig> {
        self.flow_names.get(name).and_then(|id| self.flows.get(id))
    }

    /// Returns all flows having the VM as source or destination.
    pub fn flows_of_vm(&self, vm: VmId) -> Vec<&FlowConfig> {
        self.flows.values().filter(|f| f.src == vm || f.dst == vm).collect()
    }

    /// Returns all registered flows.
    pub fn flows(&self) -> impl Iterator<Item = &FlowConfig> {
        self.flows.values()
    }

    /// Registers SFC policy, replacing previous policy with the same name.
    pub fn add_sfc_policy(&mut self, policy: SfcPolicy) {
        self.sfc_policies.insert(policy.name.clone(), policy);
    }

    /// Returns SFC policy by name.
    pub fn sfc_policy(&self, name: &str) -> Option<&SfcPolicy> {
        self.sfc_policies.get(name)
    }

    /// Returns SFC policies applying to the flow.
    pub fn sfc_policies_of_flow(&self, src: VmId, dst: VmId, flow: FlowId) -> Vec<&SfcPolicy> {
        self.sfc_policies
            .values()
            .filter(|p| p.src == src && p.dst == dst && p.flow == flow)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_lookup_by_name_follows_replacement() {
        let mut registry = SdnRegistry::new();
        registry.add_flow(FlowConfig::new(1, "db", 1, 2, 100.));
        assert_eq!(registry.flow_by_name("db").unwrap().bandwidth, 100.);

        registry.add_flow(FlowConfig::new(1, "db-fast", 1, 2, 500.));
        assert!(registry.flow_by_name("db").is_none());
        assert_eq!(registry.flow_by_name("db-fast").unwrap().bandwidth, 500.);

        registry.remove_flow(1);
        assert!(registry.flow(1).is_none());
        assert!(registry.flow_by_name("db-fast").is_none());
    }

    #[test]
    fn flows_of_vm() {
        let mut registry = SdnRegistry::new();
        registry.add_flow(FlowConfig::new(1, "a", 1, 2, 100.));
        registry.add_flow(FlowConfig::new(2, "b", 2, 3, 100.));
        registry.add_flow(FlowConfig::new(3, "c", 3, 4, 100.));
        let ids: Vec<FlowId> = registry.flows_of_vm(2).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn sfc_policies_are_matched_by_flow() {
        let mut registry = SdnRegistry::new();
        registry.add_vm(VmInfo::new(1, "web"));
        registry.add_vm(VmInfo::new(2, "db"));
        registry.add_vm(VmInfo::new(3, "firewall"));
        registry.add_sfc_policy(SfcPolicy {
            name: "guarded".to_string(),
            src: 1,
            dst: 2,
            flow: 7,
            chain: vec![3],
            expected_time: Some(0.5),
        });
        assert_eq!(registry.vm_by_name("firewall").map(|vm| vm.id), Some(3));
        assert_eq!(registry.sfc_policies_of_flow(1, 2, 7).len(), 1);
        assert!(registry.sfc_policies_of_flow(2, 1, 7).is_empty());
        assert_eq!(registry.sfc_policy("guarded").unwrap().chain, vec![3]);

        registry.remove_vm(3);
        assert!(registry.vm_by_name("firewall").is_none());
    }
}
