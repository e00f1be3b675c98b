//! Server synchronization loop.
//!
//! Network callbacks feed a [`BundleCollector`]; once per tick the collected
//! inputs become a [`StateBundle`] on a blocking queue. The [`SyncLoop`] is
//! the only thread that mutates actors or the map: it applies each bundle,
//! broadcasts the resulting snapshot, then runs queued chat and commands.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, select};
use cubesync_engine::world::Map;
use cubesync_engine::world::block::BlockId;
use indexmap::IndexMap;
use vek::Vec3;

use crate::actor::{Actor, ActorId};
use crate::commands::{CommandContext, CommandRegistry};
use crate::input::InputState;
use crate::message::{BlockEdit, ServerMessage, WorldSnapshot};

/// One tick's worth of client input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBundle {
    pub sequence: u64,
    /// Latest input per actor received during the tick.
    pub inputs: BTreeMap<ActorId, InputState>,
    /// Block edits in arrival order.
    pub edits: Vec<(ActorId, BlockEdit)>,
}

/// Gathers input between ticks. Lives behind the network callbacks' lock.
#[derive(Debug, Default)]
pub struct BundleCollector {
    next_sequence: u64,
    inputs: BTreeMap<ActorId, InputState>,
    edits: Vec<(ActorId, BlockEdit)>,
    newest: HashMap<ActorId, u64>,
}

impl BundleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `state` unless a newer input from the same actor was already seen.
    /// Unreliable delivery can reorder states; stale ones are dropped.
    pub fn record_input(&mut self, actor: ActorId, state: InputState) -> bool {
        if self
            .newest
            .get(&actor)
            .is_some_and(|&newest| state.sequence <= newest)
        {
            return false;
        }
        self.newest.insert(actor, state.sequence);
        self.inputs.insert(actor, state);
        true
    }

    pub fn record_edit(&mut self, actor: ActorId, edit: BlockEdit) {
        self.edits.push((actor, edit));
    }

    /// Drop everything held for a departed actor.
    pub fn forget(&mut self, actor: ActorId) {
        self.newest.remove(&actor);
        self.inputs.remove(&actor);
        self.edits.retain(|(a, _)| *a != actor);
    }

    /// Close the current tick. Bundles are numbered from 0 without gaps.
    pub fn take_bundle(&mut self) -> StateBundle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        StateBundle {
            sequence,
            inputs: std::mem::take(&mut self.inputs),
            edits: std::mem::take(&mut self.edits),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    Joined { id: ActorId, name: String },
    Left { id: ActorId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: ActorId,
    pub text: String,
}

/// A message for the network side to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Broadcast(ServerMessage),
    To(ActorId, ServerMessage),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    /// Seconds of simulated time per bundle.
    pub dt: f32,
    /// Blocks per second.
    pub move_speed: f32,
    pub spawn: Vec3<f32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            dt: 0.05,
            move_speed: 4.3,
            spawn: Vec3::new(0.0, 2.0, 0.0),
        }
    }
}

/// Receiving ends the loop reads from.
pub struct SyncInbox {
    pub bundles: Receiver<StateBundle>,
    pub events: Receiver<ActorEvent>,
    pub chat: Receiver<ChatMessage>,
    /// A message or disconnect here ends [`SyncLoop::run`].
    pub shutdown: Receiver<()>,
}

/// Sending ends for the network side.
#[derive(Clone)]
pub struct SyncFeed {
    pub bundles: Sender<StateBundle>,
    pub events: Sender<ActorEvent>,
    pub chat: Sender<ChatMessage>,
    pub shutdown: Sender<()>,
}

/// Create the channels between the network side and a [`SyncLoop`].
pub fn channels() -> (SyncFeed, SyncInbox) {
    let (bundles_tx, bundles_rx) = crossbeam_channel::unbounded();
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let (chat_tx, chat_rx) = crossbeam_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    (
        SyncFeed {
            bundles: bundles_tx,
            events: events_tx,
            chat: chat_tx,
            shutdown: shutdown_tx,
        },
        SyncInbox {
            bundles: bundles_rx,
            events: events_rx,
            chat: chat_rx,
            shutdown: shutdown_rx,
        },
    )
}

pub struct SyncLoop {
    map: Arc<Map>,
    actors: IndexMap<ActorId, Actor>,
    commands: CommandRegistry,
    settings: SyncSettings,
    inbox: SyncInbox,
    outgoing: Sender<Outgoing>,
    ticks: u64,
}

impl SyncLoop {
    pub fn new(
        map: Arc<Map>,
        commands: CommandRegistry,
        settings: SyncSettings,
        inbox: SyncInbox,
        outgoing: Sender<Outgoing>,
    ) -> Self {
        Self {
            map,
            actors: IndexMap::new(),
            commands,
            settings,
            inbox,
            outgoing,
            ticks: 0,
        }
    }

    pub fn actors(&self) -> &IndexMap<ActorId, Actor> {
        &self.actors
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Block on the bundle queue and process bundles until shutdown is
    /// signalled or every bundle sender is gone. Map failures are fatal.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("Sync loop started");
        let bundles = self.inbox.bundles.clone();
        let shutdown = self.inbox.shutdown.clone();
        loop {
            select! {
                recv(bundles) -> bundle => match bundle {
                    Ok(bundle) => self.process(bundle)?,
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        tracing::info!("Sync loop stopped after {} ticks", self.ticks);
        Ok(())
    }

    /// Apply one bundle: joins and leaves, every input once, queued edits,
    /// then the snapshot broadcast, then chat in arrival order.
    pub fn process(&mut self, bundle: StateBundle) -> Result<()> {
        self.apply_actor_events();

        let dt = self.settings.dt;
        let speed = self.settings.move_speed;
        for (id, input) in &bundle.inputs {
            match self.actors.get_mut(id) {
                Some(actor) => actor.apply_input(input, dt, speed),
                None => tracing::debug!("Input for unknown actor {}", id),
            }
        }

        for (actor, edit) in &bundle.edits {
            self.apply_edit(*actor, *edit)?;
        }

        let snapshot = WorldSnapshot {
            tick: bundle.sequence,
            actors: self.actors.values().map(Actor::state).collect(),
        };
        self.send(Outgoing::Broadcast(ServerMessage::Snapshot(snapshot)));

        self.drain_chat();
        self.ticks += 1;
        Ok(())
    }

    fn send(&self, message: Outgoing) {
        // The network side is gone only during shutdown.
        let _ = self.outgoing.send(message);
    }

    fn notice(&self, to: ActorId, text: String) {
        self.send(Outgoing::To(to, ServerMessage::Chat { from: None, text }));
    }

    fn apply_actor_events(&mut self) {
        while let Ok(event) = self.inbox.events.try_recv() {
            match event {
                ActorEvent::Joined { id, name } => {
                    tracing::info!("{} joined as actor {}", name, id);
                    let text = format!("{name} joined");
                    self.actors
                        .insert(id, Actor::new(id, name, self.settings.spawn));
                    self.send(Outgoing::Broadcast(ServerMessage::Chat { from: None, text }));
                }
                ActorEvent::Left { id } => {
                    if let Some(actor) = self.actors.shift_remove(&id) {
                        tracing::info!("{} left", actor.name);
                        let text = format!("{} left", actor.name);
                        self.send(Outgoing::Broadcast(ServerMessage::Chat { from: None, text }));
                    }
                }
            }
        }
    }

    fn apply_edit(&mut self, actor: ActorId, edit: BlockEdit) -> Result<()> {
        let pos = edit.pos();
        // A chunk that cannot be loaded is fatal; everything after is per-edit.
        self.map.chunk_at(pos)?;

        let result = match edit {
            BlockEdit::Place { block, .. } => {
                if block.is_sentinel() || !self.map.referrer().contains(block) {
                    Err(anyhow!("block {} cannot be placed", block.0))
                } else {
                    self.map.place_block(pos, block, Some(actor))
                }
            }
            BlockEdit::Break { .. } => self.map.break_block(pos, Some(actor)).map(|_| ()),
            BlockEdit::Interact { .. } => self.map.interact(pos, Some(actor)),
        };
        if let Err(e) = result {
            tracing::warn!("Edit {:?} by actor {} failed: {:#}", edit, actor, e);
            self.notice(actor, format!("edit failed: {e:#}"));
        }

        let block: BlockId = self.map.get_block_at(pos)?;
        self.send(Outgoing::Broadcast(ServerMessage::BlockChanged { pos, block }));
        Ok(())
    }

    fn drain_chat(&mut self) {
        while let Ok(message) = self.inbox.chat.try_recv() {
            let text = message.text.trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('/') {
                self.run_command(message.from, text);
            } else {
                let from = self.actors.get(&message.from).map(|a| a.name.clone());
                self.send(Outgoing::Broadcast(ServerMessage::Chat {
                    from,
                    text: text.to_string(),
                }));
            }
        }
    }

    fn run_command(&mut self, sender: ActorId, line: &str) {
        let mut ctx = CommandContext::new(&self.map, &mut self.actors, sender);
        let commands = &self.commands;
        // A panicking handler is reported like a failing one.
        let result = panic::catch_unwind(AssertUnwindSafe(|| commands.execute(&mut ctx, line)))
            .unwrap_or_else(|payload| {
                let name = line.split_whitespace().next().unwrap_or(line);
                Err(anyhow!("{name}: command panicked: {}", panic_text(&*payload)))
            });
        let (replies, broadcasts) = ctx.into_output();

        for message in broadcasts {
            self.send(Outgoing::Broadcast(message));
        }
        for reply in replies {
            self.notice(sender, reply);
        }
        if let Err(e) = result {
            tracing::warn!("Command '{}' from actor {} failed: {:#}", line, sender, e);
            self.notice(sender, format!("{e:#}"));
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string payload"
    }
}
