//! The dispatch scheduler: delivers translated events to subscribed,
//! permitted extensions in a defined order and collects the resulting
//! mutation proposals.
//!
//! Ordering contract: events are delivered strictly in sequence-number order,
//! and for each event every PluginAPI listener is invoked before any ModAPI
//! listener, in registration order within each ecosystem. Within one stage,
//! callbacks start in registration order and run concurrently on a bounded
//! worker pool; the stage joins fully before the next stage (or event)
//! starts.
//!
//! Failure semantics: a callback error, panic or timeout is recorded against
//! the extension and never aborts delivery to other listeners or later
//! events. An extension whose fault count crosses the configured threshold
//! is unregistered exactly once and the unregistration is reported on the
//! operational channel.

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::listener::{BridgeEvent, ExtensionListener, ExtensionNotification, UnregisterReason};
use crate::proposal::ProposalSink;
use crate::registry::{CapabilityRegistry, Ecosystem, RegisteredExtension, RegistrySnapshot};
use crate::tick::{TickContext, TickPhase};
use crate::translate::{translate, ModView, PluginView, TranslatedEvent};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Live dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_dispatched: AtomicU64,
    callbacks_invoked: AtomicU64,
    callbacks_faulted: AtomicU64,
    callbacks_timed_out: AtomicU64,
    extensions_unregistered: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            callbacks_faulted: self.callbacks_faulted.load(Ordering::Relaxed),
            callbacks_timed_out: self.callbacks_timed_out.load(Ordering::Relaxed),
            extensions_unregistered: self.extensions_unregistered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`DispatchStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub events_dispatched: u64,
    pub callbacks_invoked: u64,
    pub callbacks_faulted: u64,
    pub callbacks_timed_out: u64,
    pub extensions_unregistered: u64,
}

/// The ecosystem view handed to one delivery stage.
#[derive(Clone)]
enum StageView {
    Plugin(PluginView),
    Mod(ModView),
}

enum CallbackOutcome {
    Completed,
    Faulted(String),
    TimedOut,
}

/// Orders and delivers translated events to registered listeners within
/// deterministic tick boundaries.
pub struct DispatchScheduler {
    registry: Arc<CapabilityRegistry>,
    listener_timeout: Duration,
    fault_threshold: u32,
    workers: Arc<Semaphore>,
    faults: DashMap<String, u32>,
    stats: Arc<DispatchStats>,
    ops: mpsc::UnboundedSender<BridgeEvent>,
}

impl DispatchScheduler {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        config: &BridgeConfig,
        ops: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        Self {
            registry,
            listener_timeout: config.listener_timeout(),
            fault_threshold: config.fault_threshold,
            workers: Arc::new(Semaphore::new(config.effective_workers())),
            faults: DashMap::new(),
            stats: Arc::new(DispatchStats::default()),
            ops,
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current accumulated fault count for an extension.
    pub fn fault_count(&self, name: &str) -> u32 {
        self.faults.get(name).map_or(0, |count| *count)
    }

    /// Deliver every event of the collecting tick.
    ///
    /// Ordering follows the registry snapshot taken at the start of the tick;
    /// whether a listener still receives a given delivery is re-checked
    /// against the live registry, so a mid-tick unregistration stops all
    /// further deliveries to that extension immediately.
    pub async fn dispatch(&self, ctx: &TickContext) -> Result<(), BridgeError> {
        if ctx.phase() != TickPhase::Collecting {
            return Err(BridgeError::ContractViolation(format!(
                "dispatch called during {} phase of tick {}",
                ctx.phase(),
                ctx.tick()
            )));
        }

        let snapshot = self.registry.snapshot();
        for event in ctx.events() {
            let translated = translate(event);
            self.stats.events_dispatched.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(tick = ctx.tick(), seq = event.seq, category = %event.category, "dispatching event");

            self.deliver_stage(Ecosystem::PluginApi, &snapshot, &translated, ctx)
                .await;
            self.deliver_stage(Ecosystem::ModApi, &snapshot, &translated, ctx)
                .await;
        }
        Ok(())
    }

    /// Deliver one event to every eligible listener of one ecosystem, then
    /// wait for the whole stage to settle.
    async fn deliver_stage(
        &self,
        ecosystem: Ecosystem,
        snapshot: &RegistrySnapshot,
        translated: &TranslatedEvent,
        ctx: &TickContext,
    ) {
        let stage_view = match ecosystem {
            Ecosystem::PluginApi => match &translated.plugin {
                Some(view) => StageView::Plugin(view.clone()),
                None => return,
            },
            Ecosystem::ModApi => match &translated.mod_api {
                Some(view) => StageView::Mod(view.clone()),
                None => return,
            },
        };

        let mut waiters = Vec::new();
        for entry in snapshot.listeners(ecosystem) {
            if !entry.handle.subscribes_to(translated.category) {
                continue;
            }
            // Honour mid-tick unregistration: ordering comes from the tick
            // snapshot, membership from the live registry.
            if !self.registry.contains(entry.handle.name()) {
                continue;
            }

            // Permits are acquired in registration order, so callbacks also
            // start in registration order.
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                tracing::warn!("worker pool closed; stopping stage delivery");
                break;
            };

            let listener = entry.listener.clone();
            let view = stage_view.clone();
            let sink = ProposalSink::new(entry.handle.clone(), ctx.proposal_queue());
            let join = tokio::task::spawn_blocking(move || {
                match (&listener, &view) {
                    (ExtensionListener::Plugin(l), StageView::Plugin(v)) => l.on_event(v, &sink),
                    (ExtensionListener::Mod(l), StageView::Mod(v)) => l.on_event(v, &sink),
                    // A snapshot never pairs a listener with the other
                    // ecosystem's view.
                    _ => Ok(()),
                }
            });
            self.stats.callbacks_invoked.fetch_add(1, Ordering::Relaxed);

            let timeout = self.listener_timeout;
            let entry = entry.clone();
            // The permit lives in the waiter, not the callback: a timed-out
            // callback's thread is abandoned to the blocking pool and its
            // worker slot is reclaimed immediately.
            waiters.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = match tokio::time::timeout(timeout, join).await {
                    Err(_) => CallbackOutcome::TimedOut,
                    Ok(Err(join_err)) => {
                        CallbackOutcome::Faulted(format!("callback panicked: {join_err}"))
                    }
                    Ok(Ok(Err(err))) => CallbackOutcome::Faulted(format!("{err:#}")),
                    Ok(Ok(Ok(()))) => CallbackOutcome::Completed,
                };
                (entry, outcome)
            }));
        }

        for result in join_all(waiters).await {
            let Ok((entry, outcome)) = result else {
                continue;
            };
            match outcome {
                CallbackOutcome::Completed => {}
                CallbackOutcome::TimedOut => {
                    self.stats
                        .callbacks_timed_out
                        .fetch_add(1, Ordering::Relaxed);
                    self.record_fault(&entry, "listener timed out");
                }
                CallbackOutcome::Faulted(detail) => {
                    self.stats.callbacks_faulted.fetch_add(1, Ordering::Relaxed);
                    self.record_fault(&entry, &detail);
                }
            }
        }
    }

    /// Record a fault against an extension; crossing the threshold trips the
    /// circuit breaker and unregisters it.
    fn record_fault(&self, entry: &Arc<RegisteredExtension>, detail: &str) {
        let name = entry.handle.name();
        let faults = {
            let mut count = self.faults.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let fault = BridgeError::ListenerFault {
            identity: name.to_string(),
            detail: detail.to_string(),
        };
        tracing::warn!(
            error = %fault,
            faults,
            threshold = self.fault_threshold,
            "listener fault"
        );

        if faults < self.fault_threshold {
            return;
        }
        // `unregister` is idempotent, so the breaker trips at most once even
        // if several faults land concurrently.
        if self.registry.unregister(name) {
            self.faults.remove(name);
            self.stats
                .extensions_unregistered
                .fetch_add(1, Ordering::Relaxed);
            let reason = UnregisterReason::FaultThreshold {
                faults,
                threshold: self.fault_threshold,
            };
            entry.listener.notify(&ExtensionNotification::Unregistered {
                reason: reason.clone(),
            });
            let _ = self.ops.send(BridgeEvent::ExtensionUnregistered {
                identity: entry.handle.identity.clone(),
                ecosystem: entry.handle.ecosystem,
                reason,
            });
            tracing::error!(
                extension = %entry.handle.identity,
                "extension exceeded fault threshold and was unregistered"
            );
        }
    }
}
