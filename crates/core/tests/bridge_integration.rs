//! End-to-end tests driving the bridge through whole ticks: ordering,
//! conflict resolution, circuit breaking, mid-tick unregistration and
//! boundary-only shutdown.

use janus::{
    BlockPos, BlockState, Bridge, BridgeConfig, BridgeEvent, CapabilityRegistry, EventCategory,
    Extension, ExtensionNotification, ModListener, ModView, Occurrence, PlayerAction, PlayerId,
    PluginListener, PluginView, ProposalSink, RejectReason, SubjectRef, SubjectValue,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn version() -> semver::Version {
    semver::Version::new(1, 0, 0)
}

/// Records every delivered view as `"<ecosystem>:<detail>"`.
#[derive(Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl PluginListener for Recorder {
    fn on_event(&self, view: &PluginView, _sink: &ProposalSink) -> anyhow::Result<()> {
        let entry = match view {
            PluginView::BlockChange { position, .. } => format!("plugin:block:{}", position.x),
            PluginView::CreatureSpawn { entity, .. } => format!("plugin:spawn:{entity}"),
            PluginView::ServerTick { tick } => format!("plugin:tick:{tick}"),
            PluginView::PlayerInteract { .. } => "plugin:player".into(),
            PluginView::Opaque { name, .. } => format!("plugin:opaque:{name}"),
        };
        self.log.lock().push(entry);
        Ok(())
    }
}

impl ModListener for Recorder {
    fn on_event(&self, view: &ModView, _sink: &ProposalSink) -> anyhow::Result<()> {
        let entry = match view {
            ModView::BlockUpdate { position, .. } => format!("mod:block:{}", position.x),
            ModView::EntityJoinWorld { entity, .. } => format!("mod:spawn:{entity}"),
            ModView::WorldTick { tick } => format!("mod:tick:{tick}"),
            ModView::EntityTravel { entity, .. } => format!("mod:travel:{entity}"),
            ModView::Opaque { name, .. } => format!("mod:opaque:{name}"),
        };
        self.log.lock().push(entry);
        Ok(())
    }
}

/// Proposes a fixed value whenever the watched block changes; collects its
/// own rejection notifications.
struct BlockOverride {
    at: BlockPos,
    value: &'static str,
    priority: i32,
    notifications: Arc<Mutex<Vec<ExtensionNotification>>>,
}

impl BlockOverride {
    fn new(at: BlockPos, value: &'static str, priority: i32) -> Self {
        Self {
            at,
            value,
            priority,
            notifications: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn propose(&self, sink: &ProposalSink) {
        sink.propose_with_priority(
            SubjectRef::Block(self.at),
            SubjectValue::Block(BlockState::new(self.value)),
            self.priority,
        );
    }
}

impl PluginListener for BlockOverride {
    fn on_event(&self, view: &PluginView, sink: &ProposalSink) -> anyhow::Result<()> {
        if let PluginView::BlockChange { position, .. } = view {
            if *position == self.at {
                self.propose(sink);
            }
        }
        Ok(())
    }

    fn on_notification(&self, notification: &ExtensionNotification) {
        self.notifications.lock().push(notification.clone());
    }
}

impl ModListener for BlockOverride {
    fn on_event(&self, view: &ModView, sink: &ProposalSink) -> anyhow::Result<()> {
        if let ModView::BlockUpdate { position, .. } = view {
            if *position == self.at {
                self.propose(sink);
            }
        }
        Ok(())
    }

    fn on_notification(&self, notification: &ExtensionNotification) {
        self.notifications.lock().push(notification.clone());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn plugin_listeners_precede_mod_listeners_in_sequence_order() {
    janus::telemetry::init_with_filter("warn");
    let mut bridge = Bridge::new(BridgeConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = bridge.registry();
    registry
        .register(Extension::plugin(
            "recorder-p",
            version(),
            Arc::new(Recorder { log: log.clone() }),
        ))
        .unwrap();
    registry
        .register(Extension::mod_api(
            "recorder-m",
            version(),
            Arc::new(Recorder { log: log.clone() }),
        ))
        .unwrap();

    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(1, 0, 0),
        block: BlockState::new("stone"),
    });
    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(2, 0, 0),
        block: BlockState::new("stone"),
    });
    bridge.run_tick().await.unwrap();

    let entries = log.lock().clone();
    assert_eq!(
        entries,
        vec![
            "plugin:block:1",
            "mod:block:1",
            "plugin:block:2",
            "mod:block:2",
            "plugin:tick:0",
            "mod:tick:0",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn plugin_precedence_scenario_applies_the_plugin_proposal() {
    let mut bridge = Bridge::new(BridgeConfig::default());
    let registry = bridge.registry();
    let pos = BlockPos::new(1, 2, 3);

    // Seed the world before any listener is watching.
    bridge.submit(Occurrence::BlockSet {
        position: pos,
        block: BlockState::new("stone"),
    });
    bridge.run_tick().await.unwrap();
    assert_eq!(bridge.world().block_at(pos), BlockState::new("stone"));

    let l1 = Arc::new(BlockOverride::new(pos, "air", 0));
    let l2 = Arc::new(BlockOverride::new(pos, "water", 0));
    registry
        .register(Extension::plugin("l1", version(), l1.clone()))
        .unwrap();
    registry
        .register(Extension::mod_api("l2", version(), l2.clone()))
        .unwrap();

    bridge.submit(Occurrence::BlockSet {
        position: pos,
        block: BlockState::new("gravel"),
    });
    bridge.submit(Occurrence::EntitySpawned {
        entity: janus::EntityId::new(42),
        kind: "zombie".into(),
        position: BlockPos::new(0, 64, 0),
    });
    let summary = bridge.run_tick().await.unwrap();

    // Plugin precedence: l1's proposal wins, l2 is told why.
    assert_eq!(bridge.world().block_at(pos), BlockState::air());
    assert!(summary.rejected >= 1);
    assert!(l1.notifications.lock().is_empty());

    let l2_notes = l2.notifications.lock().clone();
    assert_eq!(l2_notes.len(), 1);
    match &l2_notes[0] {
        ExtensionNotification::MutationRejected {
            subject,
            proposed,
            reason,
        } => {
            assert_eq!(*subject, SubjectRef::Block(pos));
            assert_eq!(*proposed, SubjectValue::Block(BlockState::new("water")));
            assert_eq!(
                *reason,
                RejectReason::Superseded {
                    winner: "l1".into()
                }
            );
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_priority_beats_registration_and_precedence() {
    let mut bridge = Bridge::new(BridgeConfig::default());
    let registry = bridge.registry();
    let pos = BlockPos::new(0, 0, 0);

    // Registered first, plugin ecosystem, lower priority.
    let low = Arc::new(BlockOverride::new(pos, "coal", 3));
    // Registered second, mod ecosystem, higher priority.
    let high = Arc::new(BlockOverride::new(pos, "diamond", 7));
    registry
        .register(Extension::plugin("low", version(), low.clone()))
        .unwrap();
    registry
        .register(Extension::mod_api("high", version(), high.clone()))
        .unwrap();

    bridge.submit(Occurrence::BlockSet {
        position: pos,
        block: BlockState::new("stone"),
    });
    bridge.run_tick().await.unwrap();

    assert_eq!(bridge.world().block_at(pos), BlockState::new("diamond"));
    assert_eq!(low.notifications.lock().len(), 1);
    assert!(high.notifications.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn disjoint_proposals_all_apply() {
    struct TickBuilder {
        at: BlockPos,
        value: &'static str,
    }

    impl PluginListener for TickBuilder {
        fn on_event(&self, view: &PluginView, sink: &ProposalSink) -> anyhow::Result<()> {
            if matches!(view, PluginView::ServerTick { .. }) {
                sink.propose(
                    SubjectRef::Block(self.at),
                    SubjectValue::Block(BlockState::new(self.value)),
                );
            }
            Ok(())
        }
    }

    let mut bridge = Bridge::new(BridgeConfig::default());
    let registry = bridge.registry();
    registry
        .register(Extension::plugin(
            "iron-builder",
            version(),
            Arc::new(TickBuilder {
                at: BlockPos::new(10, 0, 0),
                value: "iron",
            }),
        ))
        .unwrap();
    registry
        .register(Extension::plugin(
            "gold-builder",
            version(),
            Arc::new(TickBuilder {
                at: BlockPos::new(20, 0, 0),
                value: "gold",
            }),
        ))
        .unwrap();

    let summary = bridge.run_tick().await.unwrap();

    assert_eq!(summary.applied, 2);
    assert_eq!(summary.rejected, 0);
    assert_eq!(
        bridge.world().block_at(BlockPos::new(10, 0, 0)),
        BlockState::new("iron")
    );
    assert_eq!(
        bridge.world().block_at(BlockPos::new(20, 0, 0)),
        BlockState::new("gold")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_timeouts_unregister_exactly_once() {
    struct Sleepy {
        invocations: Arc<AtomicU32>,
    }

    impl PluginListener for Sleepy {
        fn on_event(&self, view: &PluginView, _sink: &ProposalSink) -> anyhow::Result<()> {
            if matches!(view, PluginView::BlockChange { .. }) {
                self.invocations.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
            }
            Ok(())
        }
    }

    let config = BridgeConfig {
        listener_timeout_ms: 20,
        fault_threshold: 2,
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::new(config);
    let mut ops = bridge.take_events().unwrap();
    let invocations = Arc::new(AtomicU32::new(0));
    bridge
        .registry()
        .register(
            Extension::plugin(
                "sleepy",
                version(),
                Arc::new(Sleepy {
                    invocations: invocations.clone(),
                }),
            )
            .with_subscriptions(vec![EventCategory::BlockChange]),
        )
        .unwrap();

    for tick in 0..3 {
        bridge.submit(Occurrence::BlockSet {
            position: BlockPos::new(tick, 0, 0),
            block: BlockState::new("stone"),
        });
        bridge.run_tick().await.unwrap();
    }

    // Two timed-out deliveries trip the breaker; the third tick's event is
    // never delivered.
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert!(!bridge.registry().contains("sleepy"));

    let mut unregistrations = 0;
    while let Ok(event) = ops.try_recv() {
        if let BridgeEvent::ExtensionUnregistered { identity, .. } = event {
            assert_eq!(identity.name, "sleepy");
            unregistrations += 1;
        }
    }
    assert_eq!(unregistrations, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn mid_tick_unregistration_stops_further_deliveries() {
    struct Unregistrar {
        registry: Arc<CapabilityRegistry>,
        victim: &'static str,
        trigger_x: i32,
    }

    impl PluginListener for Unregistrar {
        fn on_event(&self, view: &PluginView, _sink: &ProposalSink) -> anyhow::Result<()> {
            if let PluginView::BlockChange { position, .. } = view {
                if position.x == self.trigger_x {
                    self.registry.unregister(self.victim);
                }
            }
            Ok(())
        }
    }

    struct CountingMod {
        deliveries: Arc<AtomicU32>,
    }

    impl ModListener for CountingMod {
        fn on_event(&self, view: &ModView, _sink: &ProposalSink) -> anyhow::Result<()> {
            if matches!(view, ModView::BlockUpdate { .. }) {
                self.deliveries.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    let mut bridge = Bridge::new(BridgeConfig::default());
    let registry = bridge.registry();
    let deliveries = Arc::new(AtomicU32::new(0));

    registry
        .register(Extension::plugin(
            "admin",
            version(),
            Arc::new(Unregistrar {
                registry: registry.clone(),
                victim: "victim",
                trigger_x: 99,
            }),
        ))
        .unwrap();
    registry
        .register(
            Extension::mod_api(
                "victim",
                version(),
                Arc::new(CountingMod {
                    deliveries: deliveries.clone(),
                }),
            )
            .with_subscriptions(vec![EventCategory::BlockChange]),
        )
        .unwrap();

    // Tick 0: delivered normally.
    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(1, 0, 0),
        block: BlockState::new("stone"),
    });
    bridge.run_tick().await.unwrap();
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);

    // Tick 1: the first event's plugin stage unregisters the victim, so
    // neither that event's mod stage nor any later event reaches it.
    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(99, 0, 0),
        block: BlockState::new("stone"),
    });
    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(2, 0, 0),
        block: BlockState::new("stone"),
    });
    bridge.run_tick().await.unwrap();

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    assert!(!registry.contains("victim"));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_mid_tick_discards_collected_proposals() {
    struct CancelOnBlockChange {
        cancel: CancellationToken,
    }

    impl PluginListener for CancelOnBlockChange {
        fn on_event(&self, view: &PluginView, sink: &ProposalSink) -> anyhow::Result<()> {
            if let PluginView::BlockChange { position, .. } = view {
                sink.propose(
                    SubjectRef::Block(*position),
                    SubjectValue::Block(BlockState::new("obsidian")),
                );
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    let mut bridge = Bridge::new(BridgeConfig::default());
    let cancel = CancellationToken::new();
    bridge
        .registry()
        .register(Extension::plugin(
            "shutdown-trigger",
            version(),
            Arc::new(CancelOnBlockChange {
                cancel: cancel.clone(),
            }),
        ))
        .unwrap();

    bridge.submit(Occurrence::BlockSet {
        position: BlockPos::new(5, 5, 5),
        block: BlockState::new("stone"),
    });
    bridge.run(cancel).await.unwrap();

    // The in-flight tick ran to the end of its collecting phase, then its
    // proposals (the listener's and the engine baseline) were discarded.
    assert!(bridge.world().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_occurrences_reach_both_ecosystems_opaquely() {
    let mut bridge = Bridge::new(BridgeConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = bridge.registry();
    registry
        .register(
            Extension::plugin(
                "recorder-p",
                version(),
                Arc::new(Recorder { log: log.clone() }),
            )
            .with_subscriptions(vec![EventCategory::Custom]),
        )
        .unwrap();
    registry
        .register(
            Extension::mod_api(
                "recorder-m",
                version(),
                Arc::new(Recorder { log: log.clone() }),
            )
            .with_subscriptions(vec![EventCategory::Custom]),
        )
        .unwrap();

    bridge.submit(Occurrence::Custom {
        subject: SubjectRef::Block(BlockPos::new(0, 0, 0)),
        name: "weather_change".into(),
        data: serde_json::json!({ "raining": true }),
    });
    bridge.run_tick().await.unwrap();

    let entries = log.lock().clone();
    assert_eq!(
        entries,
        vec!["plugin:opaque:weather_change", "mod:opaque:weather_change"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn player_join_creates_a_profile_and_session_state() {
    let mut bridge = Bridge::new(BridgeConfig::default());
    let player = PlayerId::random();

    bridge.submit(Occurrence::PlayerActed {
        player,
        action: PlayerAction::Join {
            username: "steve".into(),
        },
        target: None,
    });
    bridge.run_tick().await.unwrap();

    let profile = bridge.profiles().get(player).unwrap();
    assert_eq!(profile.username, "steve");

    match bridge.world().get(&SubjectRef::Player(player)) {
        Some(SubjectValue::Player(state)) => {
            assert_eq!(state.username, "steve");
            assert!(state.online);
        }
        other => panic!("unexpected player state: {other:?}"),
    }
}
