//! Generators of common data-center topologies.

use crate::error::Result;
use crate::node::{NodeId, NodeKind, SwitchTier};
use crate::topology::PhysicalTopology;

/// Parameters of a two-tier tree: one core switch, edge switches below it and hosts below each edge switch.
#[derive(Clone, Debug)]
pub struct TreeOpts {
    /// Number of edge switches.
    pub edges: usize,
    /// Number of hosts connected to each edge switch.
    pub hosts_per_edge: usize,
    /// Host port bandwidth.
    pub host_bandwidth: f64,
    /// Switch port bandwidth.
    pub switch_bandwidth: f64,
    /// Latency of every link.
    pub latency: f64,
}

impl Default for TreeOpts {
    fn default() -> Self {
        Self {
            edges: 2,
            hosts_per_edge: 2,
            host_bandwidth: 1000.,
            switch_bandwidth: 1000.,
            latency: 0.,
        }
    }
}

/// Parameters of a k-ary fat-tree.
#[derive(Clone, Debug)]
pub struct FatTreeOpts {
    /// Switch arity, must be even.
    pub k: usize,
    /// Host port bandwidth.
    pub host_bandwidth: f64,
    /// Switch port bandwidth.
    pub switch_bandwidth: f64,
    /// Latency of every link.
    pub latency: f64,
}

impl Default for FatTreeOpts {
    fn default() -> Self {
        Self {
            k: 4,
            host_bandwidth: 1000.,
            switch_bandwidth: 1000.,
            latency: 0.,
        }
    }
}

/// Ids of the created nodes grouped by tier.
#[derive(Clone, Debug, Default)]
pub struct BuiltTopology {
    /// Hosts, in the order of their edge switches.
    pub hosts: Vec<NodeId>,
    /// Edge switches.
    pub edges: Vec<NodeId>,
    /// Aggregate switches.
    pub aggregates: Vec<NodeId>,
    /// Core switches.
    pub cores: Vec<NodeId>,
    /// Datacenter gateways.
    pub gateways: Vec<NodeId>,
    /// Intercloud switches.
    pub intercloud: Vec<NodeId>,
}

/// Adds a two-tier tree to the topology.
pub fn build_tree(topology: &mut PhysicalTopology, opts: &TreeOpts) -> Result<BuiltTopology> {
    build_prefixed_tree(topology, opts, "")
}

fn build_prefixed_tree(topology: &mut PhysicalTopology, opts: &TreeOpts, prefix: &str) -> Result<BuiltTopology> {
    let mut built = BuiltTopology::default();
    let core = topology.add_node(
        &format!("{}core", prefix),
        NodeKind::Switch(SwitchTier::Core),
        opts.switch_bandwidth,
    )?;
    built.cores.push(core);
    for e in 0..opts.edges {
        let edge = topology.add_node(
            &format!("{}edge_{}", prefix, e),
            NodeKind::Switch(SwitchTier::Edge),
            opts.switch_bandwidth,
        )?;
        topology.add_link(core, edge, opts.latency)?;
        built.edges.push(edge);
        for h in 0..opts.hosts_per_edge {
            let host = topology.add_node(
                &format!("{}host_{}_{}", prefix, e, h),
                NodeKind::Host,
                opts.host_bandwidth,
            )?;
            topology.add_link(edge, host, opts.latency)?;
            built.hosts.push(host);
        }
    }
    Ok(built)
}

/// Adds a k-ary fat-tree to the topology.
///
/// There are `(k/2)^2` core switches and `k` pods, each pod has `k/2` aggregate and `k/2` edge switches
/// connected as a complete bipartite graph, and `k/2` hosts per edge switch. Core switch `i * k/2 + j`
/// is connected to the aggregate switch `i` of every pod.
pub fn build_fat_tree(topology: &mut PhysicalTopology, opts: &FatTreeOpts) -> Result<BuiltTopology> {
    assert!(opts.k >= 2 && opts.k % 2 == 0, "Fat-tree arity must be even, got {}", opts.k);
    let half = opts.k / 2;
    let mut built = BuiltTopology::default();

    for c in 0..half * half {
        let core = topology.add_node(
            &format!("core_{}", c),
            NodeKind::Switch(SwitchTier::Core),
            opts.switch_bandwidth,
        )?;
        built.cores.push(core);
    }
    for pod in 0..opts.k {
        let mut pod_aggregates = Vec::with_capacity(half);
        for a in 0..half {
            let agg = topology.add_node(
                &format!("agg_{}_{}", pod, a),
                NodeKind::Switch(SwitchTier::Aggregate),
                opts.switch_bandwidth,
            )?;
            for j in 0..half {
                topology.add_link(built.cores[a * half + j], agg, opts.latency)?;
            }
            pod_aggregates.push(agg);
        }
        for e in 0..half {
            let edge = topology.add_node(
                &format!("edge_{}_{}", pod, e),
                NodeKind::Switch(SwitchTier::Edge),
                opts.switch_bandwidth,
            )?;
            for &agg in &pod_aggregates {
                topology.add_link(agg, edge, opts.latency)?;
            }
            for h in 0..half {
                let host = topology.add_node(
                    &format!("host_{}_{}_{}", pod, e, h),
                    NodeKind::Host,
                    opts.host_bandwidth,
                )?;
                topology.add_link(edge, host, opts.latency)?;
                built.hosts.push(host);
            }
            built.edges.push(edge);
        }
        built.aggregates.extend(pod_aggregates);
    }
    Ok(built)
}

/// Adds several datacenters joined by an intercloud switch.
///
/// Each datacenter is a tree built from its options, its core switch is attached to a datacenter gateway,
/// and all gateways are attached to a single intercloud switch.
pub fn build_inter_cloud(topology: &mut PhysicalTopology, datacenters: &[TreeOpts]) -> Result<BuiltTopology> {
    let mut built = BuiltTopology::default();
    let bandwidth = datacenters
        .iter()
        .map(|dc| dc.switch_bandwidth)
        .fold(f64::NEG_INFINITY, f64::max);
    let intercloud = topology.add_node("intercloud", NodeKind::Switch(SwitchTier::Intercloud), bandwidth)?;
    built.intercloud.push(intercloud);

    for (i, opts) in datacenters.iter().enumerate() {
        let prefix = format!("dc{}_", i);
        let dc = build_prefixed_tree(topology, opts, &prefix)?;
        let gateway = topology.add_node(
            &format!("{}gateway", prefix),
            NodeKind::Switch(SwitchTier::Gateway),
            opts.switch_bandwidth,
        )?;
        for &core in &dc.cores {
            topology.add_link(gateway, core, opts.latency)?;
        }
        topology.add_link(intercloud, gateway, opts.latency)?;
        built.gateways.push(gateway);
        built.hosts.extend(dc.hosts);
        built.edges.extend(dc.edges);
        built.cores.extend(dc.cores);
    }
    Ok(built)
}
