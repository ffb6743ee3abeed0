//! Block automation extension for the mod surface.
//!
//! Assembler machines occupy a block position and watch the blocks next to
//! them. When an adjacent block changes into one of a machine's recipe
//! inputs, the machine proposes converting it to the recipe output on the
//! same tick. Machines can be configured with a jam chance to model
//! unreliable contraptions.

use janus::{
    BlockPos, BlockState, CapabilitySet, EventCategory, Extension, ExtensionNotification,
    ModListener, ModView, ProposalSink, SubjectPattern, SubjectRef, SubjectValue,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One placed machine: a recipe table keyed by input block name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    recipes: HashMap<String, String>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a conversion recipe.
    pub fn with_recipe(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.recipes.insert(input.into(), output.into());
        self
    }

    /// Output block for an input, if the machine can process it.
    pub fn output_for(&self, input: &BlockState) -> Option<BlockState> {
        self.recipes.get(input.name()).map(BlockState::new)
    }
}

/// Mod-ecosystem extension that converts blocks next to placed machines.
pub struct AssemblerExtension {
    machines: RwLock<HashMap<BlockPos, Machine>>,
    /// Probability in `[0, 1]` that a conversion jams and is skipped.
    jam_chance: f32,
    conversions: AtomicU64,
}

impl AssemblerExtension {
    pub fn new() -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            jam_chance: 0.0,
            conversions: AtomicU64::new(0),
        }
    }

    /// Configure the jam chance. The default of `0.0` never jams.
    pub fn with_jam_chance(mut self, chance: f32) -> Self {
        self.jam_chance = chance.clamp(0.0, 1.0);
        self
    }

    /// Place a machine at a position, replacing any machine already there.
    pub fn place_machine(&self, position: BlockPos, machine: Machine) {
        tracing::info!(position = %position, "assembler placed");
        self.machines
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(position, machine);
    }

    pub fn remove_machine(&self, position: BlockPos) -> Option<Machine> {
        self.machines
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&position)
    }

    pub fn machine_count(&self) -> usize {
        self.machines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Successful conversions since startup.
    pub fn conversions(&self) -> u64 {
        self.conversions.load(Ordering::Relaxed)
    }

    /// Package this extension for registration with the bridge.
    pub fn into_extension(self: Arc<Self>) -> Extension {
        Extension::mod_api("assembler", semver::Version::new(1, 0, 0), self)
            .with_subscriptions(vec![EventCategory::BlockChange])
            .with_capabilities(CapabilitySet::new(vec![SubjectPattern::AnyBlock]))
    }

    /// The output the first adjacent machine produces for the new state, if
    /// any machine borders the position and can process it.
    fn adjacent_output(&self, position: BlockPos, new_state: &BlockState) -> Option<BlockState> {
        let machines = self
            .machines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        position
            .neighbours()
            .iter()
            .find_map(|neighbour| machines.get(neighbour)?.output_for(new_state))
    }
}

impl Default for AssemblerExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl ModListener for AssemblerExtension {
    fn on_event(&self, view: &ModView, sink: &ProposalSink) -> anyhow::Result<()> {
        let ModView::BlockUpdate {
            position,
            new_state,
            ..
        } = view
        else {
            return Ok(());
        };
        let Some(output) = self.adjacent_output(*position, new_state) else {
            return Ok(());
        };

        if self.jam_chance > 0.0 && fastrand::f32() < self.jam_chance {
            tracing::debug!(position = %position, "assembler jammed");
            return Ok(());
        }

        tracing::debug!(
            position = %position,
            input = %new_state,
            output = %output,
            "assembler converting block"
        );
        sink.propose(SubjectRef::Block(*position), SubjectValue::Block(output));
        self.conversions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_notification(&self, notification: &ExtensionNotification) {
        if let ExtensionNotification::MutationRejected { subject, reason, .. } = notification {
            // Plugin-side rules outrank machinery; losing here is routine.
            tracing::debug!(subject = %subject, reason = %reason, "assembler output rejected");
        }
    }
}
