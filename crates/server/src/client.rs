//! Client side of the synchronization pipeline.
//!
//! Connects one [`Host`] to a server, introduces itself, streams sampled
//! input and keeps the newest snapshot it has seen.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::actor::{ActorId, ActorState};
use crate::config::ClientConfig;
use crate::input::{InputQueue, InputQueueConfig, InputState, SharedInput};
use crate::message::{BlockEdit, ClientMessage, ServerMessage, WorldSnapshot};
use crate::net::{Address, Host, PeerId, Socket};

#[derive(Default)]
struct Received {
    connected: bool,
    disconnected: bool,
    messages: Vec<ServerMessage>,
}

pub struct Client<S: Socket> {
    host: Host<S>,
    server: PeerId,
    name: String,
    received: Arc<Mutex<Received>>,
    input: SharedInput,
    input_config: InputQueueConfig,
    queue: Option<InputQueue>,
    states_tx: Sender<InputState>,
    states: Receiver<InputState>,
    hello_sent: bool,
    actor: Option<ActorId>,
    snapshot: Option<WorldSnapshot>,
}

impl<S: Socket> Client<S> {
    /// Start connecting `host` to `server`. Nothing is sent until the first
    /// [`Client::step`].
    pub fn connect(mut host: Host<S>, server: Address, config: &ClientConfig) -> Self {
        let received = Arc::new(Mutex::new(Received::default()));

        let on_connect = Arc::clone(&received);
        host.on_connect(move |_, _| on_connect.lock().connected = true);
        let on_disconnect = Arc::clone(&received);
        host.on_disconnect(move |_, address| {
            tracing::info!("Lost connection to {}", address);
            on_disconnect.lock().disconnected = true;
        });
        let on_receive = Arc::clone(&received);
        host.on_receive(move |_, packet| match ServerMessage::decode(packet.data()) {
            Ok(message) => on_receive.lock().messages.push(message),
            Err(e) => tracing::debug!("Dropping server packet: {:#}", e),
        });

        let peer = host.connect(server);
        let (states_tx, states) = crossbeam_channel::unbounded();
        Self {
            host,
            server: peer,
            name: config.name.clone(),
            received,
            input: SharedInput::new(),
            input_config: config.input_config(),
            queue: None,
            states_tx,
            states,
            hello_sent: false,
            actor: None,
            snapshot: None,
        }
    }

    /// Handle for feeding device state to the input sampler.
    pub fn input(&self) -> &SharedInput {
        &self.input
    }

    pub fn input_queue(&self) -> Option<&InputQueue> {
        self.queue.as_ref()
    }

    /// Actor id assigned by the server, once welcomed.
    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    /// Newest snapshot received.
    pub fn snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshot.as_ref()
    }

    /// This client's own actor in the newest snapshot.
    pub fn own_state(&self) -> Option<&ActorState> {
        self.snapshot.as_ref()?.actor(self.actor?)
    }

    pub fn is_connected(&self) -> bool {
        self.host.peer(self.server).is_some_and(|p| p.is_connected())
    }

    pub fn host(&self) -> &Host<S> {
        &self.host
    }

    /// One pass: poll for up to `timeout`, send queued input, and return
    /// every server message received, snapshots included.
    pub async fn step(&mut self, timeout: Duration) -> Result<Vec<ServerMessage>> {
        self.host.poll(timeout).await;

        let (connected, disconnected, messages) = {
            let mut received = self.received.lock();
            (
                received.connected,
                received.disconnected,
                std::mem::take(&mut received.messages),
            )
        };
        if disconnected {
            self.stop_input();
            bail!("disconnected from server");
        }
        if connected && !self.hello_sent {
            self.send(&ClientMessage::Hello {
                name: self.name.clone(),
            })?;
            self.hello_sent = true;
        }

        for message in &messages {
            self.handle(message)?;
        }

        let states: Vec<InputState> = self.states.try_iter().collect();
        for state in states {
            self.send(&ClientMessage::State(state))?;
        }
        self.host.flush();
        Ok(messages)
    }

    pub fn chat(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(&ClientMessage::Chat(text.into()))
    }

    pub fn edit(&mut self, edit: BlockEdit) -> Result<()> {
        self.send(&ClientMessage::Edit(edit))
    }

    /// Stop sampling and start a graceful disconnect; keep stepping until
    /// [`Client::step`] reports the disconnect.
    pub fn disconnect(&mut self) {
        self.stop_input();
        self.host.disconnect(self.server);
    }

    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if !self.is_connected() {
            bail!("not connected");
        }
        self.host.send(self.server, message.to_packet()?);
        Ok(())
    }

    fn handle(&mut self, message: &ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Welcome { actor } => {
                tracing::info!("Joined as actor {}", actor);
                self.actor = Some(*actor);
                if self.queue.is_none() {
                    self.queue = Some(InputQueue::start(
                        self.input_config,
                        self.input.clone(),
                        self.states_tx.clone(),
                    )?);
                }
            }
            ServerMessage::Snapshot(snapshot) => {
                // Snapshots travel unreliably and may arrive out of order.
                if self.snapshot.as_ref().is_some_and(|s| s.tick >= snapshot.tick) {
                    return Ok(());
                }
                self.snapshot = Some(snapshot.clone());
                let applied = self.own_state().and_then(|s| s.last_input);
                if let (Some(queue), Some(sequence)) = (&self.queue, applied) {
                    queue.purge_through(sequence);
                }
            }
            ServerMessage::BlockChanged { pos, block } => {
                tracing::debug!("Block at {:?} is now {}", pos, block.0);
            }
            ServerMessage::Chat { from, text } => match from {
                Some(from) => tracing::info!("<{}> {}", from, text),
                None => tracing::info!("{}", text),
            },
        }
        Ok(())
    }

    fn stop_input(&mut self) {
        if let Some(mut queue) = self.queue.take() {
            queue.stop();
        }
    }
}
