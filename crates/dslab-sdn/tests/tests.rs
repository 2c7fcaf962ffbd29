use std::cell::RefCell;
use std::rc::Rc;

use rstest::rstest;
use serde::Serialize;
use sugars::{rc, refcell};

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::simulation::Simulation;

use dslab_sdn::builders::{build_fat_tree, build_tree, BuiltTopology, FatTreeOpts, TreeOpts};
use dslab_sdn::scheduler::SchedulerKind;
use dslab_sdn::{
    ChannelKey, Direction, FlowConfig, NetworkOperatingSystem, NodeKind, Packet, PhysicalTopology, SdnConfig, SdnError,
    SdnRegistry, StaticVmAllocation, TopologyKind, TransmissionCompleted, TransmissionFailed, VmInfo,
    DEFAULT_FLOW_ID,
};

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!(
        (x - y).abs() < eps || (x.max(y) - x.min(y)) / x.min(y) < eps,
        "Values do not match: {:.15} vs {:.15}",
        x,
        y
    );
}

// Components ----------------------------------------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Delivery {
    packet: u64,
    time: f64,
    finish_time: f64,
}

/// Records notifications about packets.
#[derive(Default)]
struct Receiver {
    completed: Vec<Delivery>,
    failed: Vec<Delivery>,
}

impl EventHandler for Receiver {
    fn on(&mut self, event: Event) {
        let time = event.time;
        cast!(match event.data {
            TransmissionCompleted {
                packet,
                start_time: _,
                finish_time,
            } => {
                self.completed.push(Delivery {
                    packet: packet.id,
                    time,
                    finish_time,
                });
            }
            TransmissionFailed {
                packet,
                start_time: _,
                fail_time,
            } => {
                self.failed.push(Delivery {
                    packet: packet.id,
                    time,
                    finish_time: fail_time,
                });
            }
        })
    }
}

#[derive(Clone, Serialize)]
struct Act {
    index: usize,
}

type Action = Box<dyn FnMut(&mut NetworkOperatingSystem)>;

/// Runs actions on the network operating system at scheduled times.
struct Driver {
    nos: Rc<RefCell<NetworkOperatingSystem>>,
    actions: Vec<Action>,
}

impl EventHandler for Driver {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Act { index } => {
                (self.actions[index])(&mut *self.nos.borrow_mut());
            }
        })
    }
}

// Environment ---------------------------------------------------------------------------------------------------------

struct Env {
    sim: Simulation,
    nos: Rc<RefCell<NetworkOperatingSystem>>,
    receiver: Rc<RefCell<Receiver>>,
    receiver_id: Id,
    built: BuiltTopology,
    client: SimulationContext,
    next_packet: u64,
}

impl Env {
    fn new(topology: PhysicalTopology, built: BuiltTopology, config: SdnConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut sim = Simulation::new(123);
        let registry = rc!(refcell!(SdnRegistry::new()));
        let allocation = rc!(refcell!(StaticVmAllocation::new()));
        let nos = rc!(refcell!(NetworkOperatingSystem::new(
            topology,
            registry,
            allocation,
            rc!(config),
            sim.create_context("nos"),
        )));
        sim.add_handler("nos", nos.clone());
        let receiver = rc!(refcell!(Receiver::default()));
        let receiver_id = sim.add_handler("receiver", receiver.clone());
        let client = sim.create_context("client");
        Self {
            sim,
            nos,
            receiver,
            receiver_id,
            built,
            client,
            next_packet: 0,
        }
    }

    fn tree(opts: TreeOpts, config: SdnConfig) -> Self {
        let mut topology = PhysicalTopology::new(TopologyKind::Tree);
        let built = build_tree(&mut topology, &opts).unwrap();
        Self::new(topology, built, config)
    }

    fn fat_tree(config: SdnConfig) -> Self {
        let mut topology = PhysicalTopology::new(TopologyKind::FatTree);
        let built = build_fat_tree(&mut topology, &FatTreeOpts::default()).unwrap();
        Self::new(topology, built, config)
    }

    /// Places VM `i` on host `hosts[i]`.
    fn place_vms(&mut self, hosts: &[usize]) {
        for (vm, host) in hosts.iter().enumerate() {
            self.nos
                .borrow_mut()
                .add_vm(VmInfo::new(vm as u32, &format!("vm{}", vm)), self.built.hosts[*host])
                .unwrap();
        }
    }

    fn send(&mut self, src: u32, dst: u32, flow: i32, size: f64) -> Packet {
        let id = self.next_packet;
        self.next_packet += 1;
        self.nos
            .borrow_mut()
            .add_packet_to_channel(Packet::new(id, src, dst, flow, size, self.receiver_id))
            .unwrap()
    }

    fn schedule(&mut self, actions: Vec<(f64, Action)>) {
        let (times, actions): (Vec<f64>, Vec<Action>) = actions.into_iter().unzip();
        let driver = Driver {
            nos: self.nos.clone(),
            actions,
        };
        let driver_id = self.sim.add_handler("driver", rc!(refcell!(driver)));
        for (index, time) in times.into_iter().enumerate() {
            self.client.emit(Act { index }, driver_id, time);
        }
    }

    fn completion(&self, packet: u64) -> Delivery {
        self.receiver
            .borrow()
            .completed
            .iter()
            .find(|d| d.packet == packet)
            .cloned()
            .unwrap_or_else(|| panic!("packet {} is not delivered", packet))
    }
}

fn assert_bandwidth_conserved(nos: &NetworkOperatingSystem) {
    for link in nos.topology().links() {
        for dir in Direction::ALL {
            assert!(
                link.allocated_dedicated_bandwidth(dir) <= link.capacity(dir) * (1. + 1e-9),
                "dedicated allocation {} exceeds capacity {} of link {} {:?}",
                link.allocated_dedicated_bandwidth(dir),
                link.capacity(dir),
                link.id(),
                dir
            );
        }
    }
}

fn small_tree() -> TreeOpts {
    TreeOpts {
        edges: 2,
        hosts_per_edge: 2,
        host_bandwidth: 100.,
        switch_bandwidth: 100.,
        latency: 0.,
    }
}

// Tests ---------------------------------------------------------------------------------------------------------------

#[rstest]
#[case(SchedulerKind::TimeShared)]
#[case(SchedulerKind::SpaceShared)]
fn transfer_over_tree(#[case] scheduler: SchedulerKind) {
    let config = SdnConfig {
        packet_scheduler: scheduler,
        ..SdnConfig::default()
    };
    let mut env = Env::tree(small_tree(), config);
    env.place_vms(&[0, 2, 1]);

    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    // channel between hosts of one edge switch, uses other link directions
    env.send(2, 0, DEFAULT_FLOW_ID, 500.);
    {
        let nos = env.nos.borrow();
        assert_eq!(nos.channel_manager().channel_count(), 2);
        for channel in nos.channel_manager().channels() {
            assert_eq!(channel.allocated_bandwidth(), 100.);
        }
        let path = nos
            .channel_manager()
            .channel(&ChannelKey::new(0, 1, DEFAULT_FLOW_ID))
            .unwrap()
            .nodes()
            .to_vec();
        let built = &env.built;
        assert_eq!(
            path,
            vec![built.hosts[0], built.edges[0], built.cores[0], built.edges[1], built.hosts[2]]
        );
    }
    env.sim.step_until_no_events();

    let first = env.completion(0);
    assert_eq!(first.finish_time, 10.);
    assert_eq!(first.time, 10.);
    assert_eq!(env.completion(1).finish_time, 5.);
    assert_eq!(env.sim.time(), 10.);

    let nos = env.nos.borrow();
    assert!(nos.channel_manager().is_empty());
    assert!(nos.topology().links().iter().all(|l| l.channel_count(Direction::Up) == 0
        && l.channel_count(Direction::Down) == 0));
    assert_eq!(nos.stats().completed_transmissions, 2);
    assert_eq!(nos.stats().transferred_volume, 1500.);
    assert_eq!(nos.stats().channels_created, 2);
}

#[test]
fn migration_preserves_progress() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    // vm0 on host 3, vm1 on host 0
    env.place_vms(&[3, 0]);
    let hosts = env.built.hosts.clone();
    let key = ChannelKey::new(0, 1, DEFAULT_FLOW_ID);
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    let old_links = env.nos.borrow().channel_manager().channel(&key).unwrap().links().to_vec();

    let observed = rc!(refcell!(Vec::new()));
    let observed_in_action = observed.clone();
    env.schedule(vec![(
        4.,
        Box::new(move |nos: &mut NetworkOperatingSystem| {
            nos.process_vm_migrate(0, hosts[3], hosts[1]).unwrap();
            let channel = nos.channel_manager().channel(&key).unwrap();
            observed_in_action
                .borrow_mut()
                .push(channel.in_flight()[0].completed_length());
            let new_links = channel.links().to_vec();
            for link in old_links.iter().filter(|l| !new_links.contains(l)) {
                assert!(!nos.topology().link(*link).has_channel(&key));
            }
            assert_eq!(channel.src_host(), hosts[1]);
            assert_bandwidth_conserved(nos);
        }) as Action,
    )]);
    env.sim.step_until_no_events();

    assert_float_eq(observed.borrow()[0], 400., 1e-9);
    assert_float_eq(env.completion(0).finish_time, 10., 1e-9);
    assert_eq!(env.nos.borrow().stats().migrations, 1);
}

#[test]
fn migration_moves_idle_forwarding_entries() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    // vm0 on host 2, vm1 on host 0
    env.place_vms(&[2, 0]);
    env.send(0, 1, DEFAULT_FLOW_ID, 100.);
    env.sim.step_until_no_events();

    let built = &env.built;
    let key = ChannelKey::new(0, 1, DEFAULT_FLOW_ID);
    let mut nos = env.nos.borrow_mut();
    assert!(nos.channel_manager().is_empty());
    assert_eq!(
        nos.topology().node(built.hosts[2]).forwarding_table().next_hop(&key),
        Some(built.edges[1])
    );

    nos.process_vm_migrate(0, built.hosts[2], built.hosts[3]).unwrap();
    let mut routed: Vec<usize> = nos
        .topology()
        .nodes()
        .iter()
        .filter(|n| n.forwarding_table().next_hop(&key).is_some())
        .map(|n| n.id())
        .collect();
    routed.sort();
    let mut expected = vec![built.hosts[3], built.edges[1], built.cores[0], built.edges[0]];
    expected.sort();
    assert_eq!(routed, expected);
    assert_eq!(
        nos.topology().node(built.hosts[3]).forwarding_table().next_hop(&key),
        Some(built.edges[1])
    );
}

#[test]
fn failed_reroute_does_not_stop_migration() {
    let mut topology = PhysicalTopology::new(TopologyKind::Tree);
    let built = build_tree(&mut topology, &small_tree()).unwrap();
    let isolated = topology.add_node("isolated", NodeKind::Host, 100.).unwrap();
    let mut env = Env::new(topology, built, SdnConfig::default());
    env.place_vms(&[0, 1, 2]);
    let hosts = env.built.hosts.clone();
    let to_vm2 = ChannelKey::new(0, 2, 1);
    let to_vm1 = ChannelKey::new(0, 1, 2);

    let mut nos = env.nos.borrow_mut();
    nos.add_flow(FlowConfig::new(1, "to-vm2", 0, 2, 10.)).unwrap();
    nos.add_flow(FlowConfig::new(2, "to-vm1", 0, 1, 10.)).unwrap();
    assert!(matches!(
        nos.process_vm_migrate(1, hosts[1], isolated),
        Err(SdnError::NoRoute { .. })
    ));
    // the flow to vm2 fails first, the flow to vm1 becomes local to the isolated host
    assert!(matches!(
        nos.process_vm_migrate(0, hosts[0], isolated),
        Err(SdnError::NoRoute { .. })
    ));
    assert_eq!(
        nos.topology().node(isolated).forwarding_table().next_hop(&to_vm1),
        Some(isolated)
    );
    assert!(nos
        .topology()
        .nodes()
        .iter()
        .all(|n| n.forwarding_table().next_hop(&to_vm2).is_none()));
    assert_eq!(nos.stats().migrations, 2);
}

#[test]
fn pending_update_is_replaced() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    env.place_vms(&[0, 2]);
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    let receiver_id = env.receiver_id;
    let actions: Vec<(f64, Action)> = (1..3u64)
        .map(|i| {
            let action = Box::new(move |nos: &mut NetworkOperatingSystem| {
                nos.add_packet_to_channel(Packet::new(i, 0, 1, DEFAULT_FLOW_ID, 1000., receiver_id))
                    .unwrap();
            }) as Action;
            (i as f64, action)
        })
        .collect();
    env.schedule(actions);
    env.sim.step_until_no_events();

    for (packet, finish_time) in [(0, 10.), (1, 20.), (2, 30.)] {
        assert_float_eq(env.completion(packet).finish_time, finish_time, 1e-9);
    }
    // updates requested at 0, 1 and 2 collapse into one at 10, then one per completion
    assert_eq!(env.nos.borrow().stats().channel_updates, 3);
}

#[test]
fn invalid_packet_size_is_rejected() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    env.place_vms(&[0, 2]);
    let receiver_id = env.receiver_id;
    let mut nos = env.nos.borrow_mut();
    for size in [-1., f64::NAN, f64::INFINITY] {
        let result = nos.add_packet_to_channel(Packet::new(0, 0, 1, DEFAULT_FLOW_ID, size, receiver_id));
        assert!(matches!(result, Err(SdnError::InvalidPacketSize(_))));
    }
    assert!(nos.channel_manager().is_empty());
}

#[test]
fn scheduler_variants_order_completions() {
    for (scheduler, expected) in [
        (SchedulerKind::TimeShared, [10., 20.]),
        (SchedulerKind::SpaceShared, [20., 20.]),
    ] {
        let config = SdnConfig {
            packet_scheduler: scheduler,
            ..SdnConfig::default()
        };
        let mut env = Env::tree(small_tree(), config);
        env.place_vms(&[0, 3]);
        env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
        env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
        env.sim.step_until_no_events();
        assert_float_eq(env.completion(0).finish_time, expected[0], 1e-9);
        assert_float_eq(env.completion(1).finish_time, expected[1], 1e-9);
    }
}

#[test]
fn later_packet_shares_from_arrival() {
    let config = SdnConfig {
        packet_scheduler: SchedulerKind::SpaceShared,
        ..SdnConfig::default()
    };
    let mut env = Env::tree(small_tree(), config);
    env.place_vms(&[0, 3]);
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    let receiver_id = env.receiver_id;
    env.schedule(vec![(
        5.,
        Box::new(move |nos: &mut NetworkOperatingSystem| {
            nos.add_packet_to_channel(Packet::new(1, 0, 1, DEFAULT_FLOW_ID, 250., receiver_id))
                .unwrap();
        }) as Action,
    )]);
    env.sim.step_until_no_events();
    // 500 left at t=5, both at 50 until the second finishes at t=10, then 250 left at 100
    assert_float_eq(env.completion(1).finish_time, 10., 1e-9);
    assert_float_eq(env.completion(0).finish_time, 12.5, 1e-9);
}

#[test]
fn completion_is_delayed_by_path_latency() {
    let opts = TreeOpts {
        latency: 0.5,
        ..small_tree()
    };
    let mut env = Env::tree(opts, SdnConfig::default());
    env.place_vms(&[0, 2]);
    assert_eq!(
        env.nos.borrow_mut().calculate_latency(0, 1, DEFAULT_FLOW_ID).unwrap(),
        2.
    );
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    env.sim.step_until_no_events();
    let delivery = env.completion(0);
    assert_eq!(delivery.finish_time, 10.);
    assert_eq!(delivery.time, 12.);
}

#[test]
fn dedicated_flow_bandwidth_update() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    env.place_vms(&[0, 2]);
    env.nos
        .borrow_mut()
        .add_flow(FlowConfig::new(1, "data", 0, 1, 50.))
        .unwrap();
    let packet = env.send(0, 1, 1, 1000.);
    assert_eq!(packet.flow, 1);
    {
        let nos = env.nos.borrow();
        let channel = nos.channel_manager().find_channel(0, 1, 1).unwrap();
        assert!(channel.is_dedicated());
        assert_eq!(channel.allocated_bandwidth(), 50.);
    }
    env.schedule(vec![(
        4.,
        Box::new(|nos: &mut NetworkOperatingSystem| {
            assert!(nos.update_bandwidth_flow(1, 100.).unwrap());
        }) as Action,
    )]);
    env.sim.step_until_no_events();
    // 200 transferred by t=4, the remaining 800 at 100
    assert_float_eq(env.completion(0).finish_time, 12., 1e-9);
    assert_eq!(
        env.nos.borrow_mut().update_bandwidth_flow(7, 10.),
        Err(SdnError::UnknownFlow(7))
    );
}

#[test]
fn unknown_flow_falls_back_to_default() {
    let mut env = Env::tree(small_tree(), SdnConfig::default());
    env.place_vms(&[0, 1]);
    let packet = env.send(0, 1, 42, 100.);
    assert_eq!(packet.flow, DEFAULT_FLOW_ID);
    assert!(env
        .nos
        .borrow()
        .channel_manager()
        .channel(&ChannelKey::new(0, 1, DEFAULT_FLOW_ID))
        .is_some());
    assert_eq!(env.nos.borrow().get_requested_bandwidth(&packet), 0.);
}

#[test]
fn transmission_timeout() {
    let config = SdnConfig {
        transmission_timeout: Some(5.),
        ..SdnConfig::default()
    };
    let mut env = Env::tree(small_tree(), config);
    env.place_vms(&[0, 2]);
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    let receiver_id = env.receiver_id;
    env.nos
        .borrow_mut()
        .add_packet_to_channel(Packet::new(100, 0, 1, DEFAULT_FLOW_ID, 100., receiver_id).with_timeout(50.))
        .unwrap();
    env.sim.step_until_no_events();

    let receiver = env.receiver.borrow();
    assert_eq!(receiver.failed.len(), 1);
    assert_eq!(receiver.failed[0].packet, 0);
    assert_float_eq(receiver.failed[0].finish_time, 5., 1e-9);
    // time-shared: the second packet starts after the first one is dropped
    assert_eq!(receiver.completed.len(), 1);
    assert_float_eq(receiver.completed[0].finish_time, 6., 1e-9);
    let nos = env.nos.borrow();
    assert_eq!(nos.stats().failed_transmissions, 1);
    assert_eq!(nos.stats().completed_transmissions, 1);
}

#[test]
fn dedicated_flows_spread_over_fat_tree() {
    let config = SdnConfig {
        link_selection: dslab_sdn::link_selection::LinkSelection::BandwidthAllocation,
        dynamic_routing: true,
        ..SdnConfig::default()
    };
    let mut env = Env::fat_tree(config);
    // hosts 0 and 1 share an edge switch, hosts 8 and 9 are in another pod
    env.place_vms(&[0, 1, 8, 9]);
    {
        let mut nos = env.nos.borrow_mut();
        nos.add_flow(FlowConfig::new(1, "a", 0, 2, 600.)).unwrap();
        nos.add_flow(FlowConfig::new(2, "b", 1, 3, 600.)).unwrap();
    }
    env.send(0, 2, 1, 6000.);
    env.send(1, 3, 2, 6000.);
    {
        let nos = env.nos.borrow();
        let a = nos.channel_manager().channel(&ChannelKey::new(0, 2, 1)).unwrap();
        let b = nos.channel_manager().channel(&ChannelKey::new(1, 3, 2)).unwrap();
        assert_eq!(a.nodes()[1], b.nodes()[1]);
        assert_ne!(a.nodes()[2], b.nodes()[2]);
        assert_eq!(a.allocated_bandwidth(), 600.);
        assert_eq!(b.allocated_bandwidth(), 600.);
        assert_bandwidth_conserved(&nos);
    }
    assert!(env.nos.borrow_mut().update_channel_bandwidth(0, 2, 1, 300.).unwrap());
    {
        let nos = env.nos.borrow();
        let a = nos.channel_manager().channel(&ChannelKey::new(0, 2, 1)).unwrap();
        assert_eq!(a.allocated_bandwidth(), 300.);
        assert_eq!(a.nodes().len(), 7);
        assert_bandwidth_conserved(&nos);
    }
    env.sim.step_until_no_events();
    assert_float_eq(env.completion(1).finish_time, 10., 1e-9);
    assert_float_eq(env.completion(0).finish_time, 20., 1e-9);
}

#[test]
fn monitoring_samples_while_channels_live() {
    let config = SdnConfig {
        monitoring_interval: 2.,
        ..SdnConfig::default()
    };
    let mut env = Env::tree(small_tree(), config);
    env.place_vms(&[0, 2]);
    env.send(0, 1, DEFAULT_FLOW_ID, 1000.);
    env.sim.step_until_no_events();
    let nos = env.nos.borrow();
    let key = ChannelKey::new(0, 1, DEFAULT_FLOW_ID);
    let history = nos.monitor().channel_history(&key);
    // ticks at 2, 4, 6, 8; the channel is gone at 10
    assert_eq!(history.len(), 4);
    assert!(history.iter().all(|s| s.allocated == 100.));
    let host = nos.monitor().host_history(env.built.hosts[0]);
    assert_eq!(host.len(), 4);
    assert_eq!(host[0].outgoing, 100.);
}

#[test]
fn registration_errors() {
    let env = Env::tree(small_tree(), SdnConfig::default());
    let edge = env.built.edges[0];
    let mut nos = env.nos.borrow_mut();
    assert_eq!(nos.add_vm(VmInfo::new(0, "vm0"), edge), Err(SdnError::NotAHost(edge)));
    assert_eq!(nos.find_host(0), Err(SdnError::UnknownVm(0)));
    assert_eq!(
        nos.add_flow(FlowConfig::new(1, "f", 0, 1, 10.)),
        Err(SdnError::UnknownVm(0))
    );
    nos.add_vm(VmInfo::new(0, "vm0"), env.built.hosts[0]).unwrap();
    nos.add_vm(VmInfo::new(1, "vm1"), env.built.hosts[1]).unwrap();
    assert_eq!(nos.find_host(1), Ok(env.built.hosts[1]));
    assert_eq!(
        nos.add_flow(FlowConfig::new(1, "f", 0, 1, -10.)),
        Err(SdnError::InvalidBandwidth(-10.))
    );
    nos.add_flow(FlowConfig::new(1, "f", 0, 1, 10.)).unwrap();
    let key = ChannelKey::new(0, 1, 1);
    // deployed flows have forwarding entries before any packet is sent
    assert!(nos
        .topology()
        .node(env.built.hosts[0])
        .forwarding_table()
        .next_hop(&key)
        .is_some());
}
