//! Network side of the server: owns the [`Host`], turns packets into input
//! for the tick thread and delivers what the tick thread produces.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use cubesync_engine::world::Map;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actor::ActorId;
use crate::commands::CommandRegistry;
use crate::config::ServerConfig;
use crate::message::{ClientMessage, ServerMessage};
use crate::net::{Host, Packet, PeerId, Socket};
use crate::sync::{
    self, ActorEvent, BundleCollector, ChatMessage, Outgoing, SyncFeed, SyncLoop,
};
use crate::tick::TickClock;

/// Longest single wait inside [`Server::step`].
const POLL_SLICE: Duration = Duration::from_millis(10);

/// State the host callbacks write into. Callbacks only record; the network
/// loop and the tick thread act on it later.
struct Inbox {
    collector: BundleCollector,
    actor_of: HashMap<PeerId, ActorId>,
    peer_of: HashMap<ActorId, PeerId>,
    welcomes: Vec<(PeerId, ActorId)>,
    next_actor: ActorId,
    events: Sender<ActorEvent>,
    chat: Sender<ChatMessage>,
}

impl Inbox {
    fn receive(&mut self, peer: PeerId, packet: Packet) {
        let message = match ClientMessage::decode(packet.data()) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Dropping packet from {:?}: {:#}", peer, e);
                return;
            }
        };
        if let ClientMessage::Hello { name } = message {
            self.hello(peer, name);
            return;
        }
        let Some(&actor) = self.actor_of.get(&peer) else {
            tracing::debug!("Ignoring {:?} before hello", message);
            return;
        };
        match message {
            ClientMessage::State(state) => {
                self.collector.record_input(actor, state);
            }
            ClientMessage::Edit(edit) => self.collector.record_edit(actor, edit),
            ClientMessage::Chat(text) => {
                let _ = self.chat.send(ChatMessage { from: actor, text });
            }
            ClientMessage::Hello { .. } => {}
        }
    }

    fn hello(&mut self, peer: PeerId, name: String) {
        if self.actor_of.contains_key(&peer) {
            return;
        }
        let actor = self.next_actor;
        self.next_actor += 1;
        self.actor_of.insert(peer, actor);
        self.peer_of.insert(actor, peer);
        self.welcomes.push((peer, actor));
        let _ = self.events.send(ActorEvent::Joined { id: actor, name });
    }

    fn disconnected(&mut self, peer: PeerId) {
        if let Some(actor) = self.actor_of.remove(&peer) {
            self.peer_of.remove(&actor);
            self.collector.forget(actor);
            let _ = self.events.send(ActorEvent::Left { id: actor });
        }
    }
}

pub struct Server<S: Socket> {
    host: Host<S>,
    map: Arc<Map>,
    inbox: Arc<Mutex<Inbox>>,
    feed: SyncFeed,
    outgoing: Receiver<Outgoing>,
    clock: TickClock,
    tick_thread: Option<JoinHandle<Result<()>>>,
}

impl<S: Socket> Server<S> {
    /// Wire `host` up and start the tick thread over `map`.
    pub fn start(
        mut host: Host<S>,
        map: Arc<Map>,
        commands: CommandRegistry,
        config: &ServerConfig,
    ) -> Result<Self> {
        let (feed, sync_inbox) = sync::channels();
        let (outgoing_tx, outgoing) = crossbeam_channel::unbounded();

        let inbox = Arc::new(Mutex::new(Inbox {
            collector: BundleCollector::new(),
            actor_of: HashMap::new(),
            peer_of: HashMap::new(),
            welcomes: Vec::new(),
            next_actor: 1,
            events: feed.events.clone(),
            chat: feed.chat.clone(),
        }));

        host.on_connect(|peer, address| {
            tracing::info!("Peer {:?} connected from {}", peer, address);
        });
        let receive_inbox = Arc::clone(&inbox);
        host.on_receive(move |peer, packet| receive_inbox.lock().receive(peer, packet));
        let disconnect_inbox = Arc::clone(&inbox);
        host.on_disconnect(move |peer, address| {
            tracing::info!("Peer {:?} at {} disconnected", peer, address);
            disconnect_inbox.lock().disconnected(peer);
        });

        let mut sync_loop = SyncLoop::new(
            Arc::clone(&map),
            commands,
            config.sync_settings(),
            sync_inbox,
            outgoing_tx,
        );
        let tick_thread = thread::Builder::new()
            .name("tick".into())
            .spawn(move || sync_loop.run())
            .context("spawning tick thread")?;

        Ok(Self {
            host,
            map,
            inbox,
            feed,
            outgoing,
            clock: TickClock::new(config.tick_period()),
            tick_thread: Some(tick_thread),
        })
    }

    pub fn host(&self) -> &Host<S> {
        &self.host
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    /// Ticks handed to the sync loop so far.
    pub fn ticks(&self) -> u64 {
        self.clock.tick()
    }

    /// One pass of the network loop: poll until the next tick is due (at
    /// most `POLL_SLICE`), deliver welcomes and tick output, and close the
    /// tick if it is due.
    pub async fn step(&mut self) -> Result<()> {
        self.check_tick_thread()?;

        let until_tick = self
            .clock
            .next_tick()
            .saturating_duration_since(Instant::now());
        self.host.poll(until_tick.min(POLL_SLICE)).await;

        let welcomes = std::mem::take(&mut self.inbox.lock().welcomes);
        for (peer, actor) in welcomes {
            self.host.send(peer, ServerMessage::Welcome { actor }.to_packet()?);
        }

        if self.clock.is_due(Instant::now()) {
            let bundle = self.inbox.lock().collector.take_bundle();
            self.feed
                .bundles
                .send(bundle)
                .map_err(|_| anyhow!("tick thread is gone"))?;
            self.clock.on_tick_done();
        }

        self.forward_outgoing()?;
        self.host.flush();
        Ok(())
    }

    /// Run [`Server::step`] until `shutdown` completes or the tick thread fails.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(()),
                result = self.step() => result?,
            }
        }
    }

    /// Stop the tick thread, drop every peer and save every loaded chunk.
    /// Returns the number of chunks written.
    pub fn shutdown(mut self) -> Result<usize> {
        let tick_result = self.stop_tick_thread();
        let peers: Vec<PeerId> = self.host.peers().map(|(id, _)| id).collect();
        for peer in peers {
            self.host.disconnect_now(peer);
        }
        tick_result?;
        self.map.save_all()
    }

    fn forward_outgoing(&mut self) -> Result<()> {
        for message in self.outgoing.try_iter() {
            match message {
                Outgoing::Broadcast(message) => self.host.broadcast(message.to_packet()?),
                Outgoing::To(actor, message) => {
                    let peer = self.inbox.lock().peer_of.get(&actor).copied();
                    if let Some(peer) = peer {
                        self.host.send(peer, message.to_packet()?);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_tick_thread(&mut self) -> Result<()> {
        if self.tick_thread.as_ref().is_some_and(JoinHandle::is_finished) {
            self.stop_tick_thread()?;
            return Err(anyhow!("tick thread stopped unexpectedly"));
        }
        Ok(())
    }

    fn stop_tick_thread(&mut self) -> Result<()> {
        let Some(handle) = self.tick_thread.take() else {
            return Ok(());
        };
        let _ = self.feed.shutdown.try_send(());
        match handle.join() {
            Ok(result) => result.context("tick thread failed"),
            Err(_) => Err(anyhow!("tick thread panicked")),
        }
    }
}

impl<S: Socket> Drop for Server<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_tick_thread() {
            tracing::error!("{:#}", e);
        }
    }
}
