use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use cubesync_engine::world::Map;
use cubesync_engine::world::block::BlockId;
use cubesync_engine::world::generator::FlatGenerator;
use cubesync_engine::world::position::BlockPos;
use cubesync_server::client::Client;
use cubesync_server::commands::{Command, CommandRegistry};
use cubesync_server::config::{ClientConfig, ServerConfig};
use cubesync_server::content;
use cubesync_server::input::{InputState, MovementFlags};
use cubesync_server::message::{BlockEdit, ServerMessage, WorldSnapshot};
use cubesync_server::net::{Host, SimNetwork};
use cubesync_server::server::Server;
use cubesync_server::sync::{
    self, ActorEvent, ChatMessage, Outgoing, StateBundle, SyncFeed, SyncLoop, SyncSettings,
};
use vek::Vec3;

struct Fixture {
    dir: PathBuf,
    map: Arc<Map>,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("cubesync_sync_{tag}"));
        let _ = std::fs::remove_dir_all(&dir);
        let referrer = Arc::new(content::referrer().unwrap());
        let generator = FlatGenerator::new(vec![content::STONE.into()]);
        let map = Arc::new(Map::new(&dir, referrer, Box::new(generator)).unwrap());
        Self { dir, map }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        dt: 0.05,
        move_speed: 4.3,
        spawn: Vec3::new(0.0, 4.0, 0.0),
    }
}

fn sync_loop(fixture: &Fixture) -> (SyncLoop, SyncFeed, Receiver<Outgoing>) {
    sync_loop_with(fixture, CommandRegistry::with_builtins())
}

fn sync_loop_with(
    fixture: &Fixture,
    commands: CommandRegistry,
) -> (SyncLoop, SyncFeed, Receiver<Outgoing>) {
    let (feed, inbox) = sync::channels();
    let (tx, rx) = crossbeam_channel::unbounded();
    let sync = SyncLoop::new(Arc::clone(&fixture.map), commands, settings(), inbox, tx);
    (sync, feed, rx)
}

fn say(feed: &SyncFeed, from: u32, lines: &[&str]) {
    for text in lines {
        feed.chat
            .send(ChatMessage {
                from,
                text: (*text).into(),
            })
            .unwrap();
    }
}

fn join(feed: &SyncFeed, id: u32, name: &str) {
    feed.events
        .send(ActorEvent::Joined {
            id,
            name: name.into(),
        })
        .unwrap();
}

fn snapshots(rx: &Receiver<Outgoing>) -> Vec<WorldSnapshot> {
    rx.try_iter()
        .filter_map(|out| match out {
            Outgoing::Broadcast(ServerMessage::Snapshot(s)) => Some(s),
            _ => None,
        })
        .collect()
}

fn notices_to(outgoing: &[Outgoing], actor: u32) -> Vec<String> {
    outgoing
        .iter()
        .filter_map(|out| match out {
            Outgoing::To(to, ServerMessage::Chat { from: None, text }) if *to == actor => {
                Some(text.clone())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn forward_input_moves_actor_and_is_acknowledged() {
    let fixture = Fixture::new("forward");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    join(&feed, 1, "alice");

    let mut bundle = StateBundle {
        sequence: 5,
        ..StateBundle::default()
    };
    bundle.inputs.insert(
        1,
        InputState {
            flags: MovementFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.25,
            sequence: 5,
        },
    );
    sync.process(bundle).unwrap();

    let snapshots = snapshots(&rx);
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(snapshot.tick, 5);
    let alice = snapshot.actor(1).unwrap();
    assert_eq!(alice.last_input, Some(5));
    assert_eq!(alice.pitch, 0.25);
    let step = 0.05 * 4.3;
    assert!((alice.position[0]).abs() < 1e-6);
    assert!((alice.position[1] - 4.0).abs() < 1e-6);
    assert!((alice.position[2] + step).abs() < 1e-5, "{:?}", alice.position);
}

#[test]
fn each_input_is_applied_once() {
    let fixture = Fixture::new("once");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    join(&feed, 1, "alice");

    let mut bundle = StateBundle::default();
    bundle.inputs.insert(
        1,
        InputState {
            flags: MovementFlags::RIGHT,
            sequence: 0,
            ..InputState::default()
        },
    );
    sync.process(bundle).unwrap();
    sync.process(StateBundle {
        sequence: 1,
        ..StateBundle::default()
    })
    .unwrap();

    let snapshots = snapshots(&rx);
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].actors, snapshots[1].actors);
    assert_eq!(snapshots[1].tick, 1);
    assert_eq!(sync.ticks(), 2);
}

#[test]
fn failing_commands_do_not_stop_later_messages() {
    let fixture = Fixture::new("commands");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    join(&feed, 1, "alice");
    say(&feed, 1, &["/tp north 0 0", "/dance", "hello", "/list"]);
    sync.process(StateBundle::default()).unwrap();

    let outgoing: Vec<Outgoing> = rx.try_iter().collect();
    let notices = notices_to(&outgoing, 1);
    assert_eq!(notices.len(), 3, "{notices:?}");
    assert!(notices[0].starts_with("/tp: 'north' is not a number"));
    assert_eq!(notices[1], "/dance: unknown command");
    assert_eq!(notices[2], "1 online: alice");
    assert!(outgoing.contains(&Outgoing::Broadcast(ServerMessage::Chat {
        from: Some("alice".into()),
        text: "hello".into(),
    })));
}

#[test]
fn panicking_command_is_reported_and_the_loop_continues() {
    let fixture = Fixture::new("panic");
    let mut commands = CommandRegistry::with_builtins();
    commands.register(
        "boom",
        Command::new("/boom", "Always panics", |_, _| panic!("kaboom")),
    );
    let (mut sync, feed, rx) = sync_loop_with(&fixture, commands);
    join(&feed, 1, "alice");
    say(&feed, 1, &["/boom now", "/list"]);
    sync.process(StateBundle::default()).unwrap();

    let outgoing: Vec<Outgoing> = rx.try_iter().collect();
    let notices = notices_to(&outgoing, 1);
    assert_eq!(
        notices,
        vec!["/boom: command panicked: kaboom", "1 online: alice"]
    );

    say(&feed, 1, &["/list"]);
    sync.process(StateBundle {
        sequence: 1,
        ..StateBundle::default()
    })
    .unwrap();
    let outgoing: Vec<Outgoing> = rx.try_iter().collect();
    assert_eq!(notices_to(&outgoing, 1), vec!["1 online: alice"]);
    assert_eq!(sync.ticks(), 2);
}

#[test]
fn edits_go_through_block_behaviors() {
    let fixture = Fixture::new("edits");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    join(&feed, 1, "alice");
    let lamp = fixture.map.referrer().id_of(content::LAMP);
    let lamp_pos = BlockPos::new(3, 5, -2);
    let ground = BlockPos::new(0, 0, 0);

    let bundle = StateBundle {
        sequence: 0,
        inputs: Default::default(),
        edits: vec![
            (1, BlockEdit::Place { pos: lamp_pos, block: lamp }),
            (1, BlockEdit::Interact { pos: lamp_pos }),
            (1, BlockEdit::Break { pos: ground }),
            (1, BlockEdit::Place { pos: ground, block: BlockId(999) }),
        ],
    };
    sync.process(bundle).unwrap();

    assert_eq!(fixture.map.get_block_at(lamp_pos).unwrap(), lamp);
    let lit = fixture
        .map
        .chunk_at(lamp_pos)
        .unwrap()
        .metadata(lamp_pos.local())
        .and_then(|m| m.get(content::LIT).and_then(|v| v.as_int()));
    assert_eq!(lit, Some(1));
    assert_eq!(fixture.map.get_block_at(ground).unwrap(), BlockId::AIR);

    let outgoing: Vec<Outgoing> = rx.try_iter().collect();
    let changes = outgoing
        .iter()
        .filter(|o| matches!(o, Outgoing::Broadcast(ServerMessage::BlockChanged { .. })))
        .count();
    assert_eq!(changes, 4);
    let notices = notices_to(&outgoing, 1);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].starts_with("edit failed"), "{notices:?}");
}

#[test]
fn leaving_actors_drop_out_of_snapshots() {
    let fixture = Fixture::new("leave");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    join(&feed, 1, "alice");
    join(&feed, 2, "bob");
    sync.process(StateBundle::default()).unwrap();
    feed.events.send(ActorEvent::Left { id: 1 }).unwrap();
    sync.process(StateBundle {
        sequence: 1,
        ..StateBundle::default()
    })
    .unwrap();

    let snapshots = snapshots(&rx);
    assert_eq!(snapshots[0].actors.len(), 2);
    let ids: Vec<u32> = snapshots[1].actors.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2]);
    assert_eq!(sync.actors().len(), 1);
}

#[test]
fn run_stops_promptly_on_shutdown() {
    let fixture = Fixture::new("shutdown");
    let (mut sync, feed, rx) = sync_loop(&fixture);
    let handle = std::thread::spawn(move || {
        sync.run().unwrap();
        sync.ticks()
    });

    feed.bundles.send(StateBundle::default()).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

    let asked = Instant::now();
    feed.shutdown.send(()).unwrap();
    let ticks = handle.join().unwrap();
    assert!(asked.elapsed() < Duration::from_millis(500));
    assert_eq!(ticks, 1);
}

#[tokio::test]
async fn client_moves_through_a_running_server() {
    let fixture = Fixture::new("end_to_end");
    let net = SimNetwork::new();
    let config = ServerConfig {
        tick_millis: 10,
        spawn: [0.0, 4.0, 0.0],
        ..ServerConfig::default()
    };
    let server_host = Host::new(net.bind_any().unwrap(), config.host_config());
    let server_addr = server_host.local_addr().unwrap();
    let mut server = Server::start(
        server_host,
        Arc::clone(&fixture.map),
        CommandRegistry::with_builtins(),
        &config,
    )
    .unwrap();

    let client_config = ClientConfig {
        name: "tester".into(),
        input_period_millis: 10,
        ..ClientConfig::default()
    };
    let client_host = Host::new(net.bind_any().unwrap(), client_config.host_config());
    let mut client = Client::connect(client_host, server_addr, &client_config);
    client.input().press(MovementFlags::FORWARD);

    let deadline = Instant::now() + Duration::from_secs(10);
    let lamp = fixture.map.referrer().id_of(content::LAMP);
    let lamp_pos = BlockPos::new(2, 1, 2);
    let mut requests_sent = false;
    let mut heard_list = false;
    let mut heard_change = false;
    loop {
        assert!(Instant::now() < deadline, "client never moved");
        server.step().await.unwrap();
        for message in client.step(Duration::from_millis(1)).await.unwrap() {
            match message {
                ServerMessage::Chat { from: None, text } => {
                    heard_list |= text == "1 online: tester";
                }
                ServerMessage::BlockChanged { pos, block } => {
                    heard_change |= pos == lamp_pos && block == lamp;
                }
                _ => {}
            }
        }
        if client.actor().is_some() && !requests_sent {
            client.chat("/list").unwrap();
            client
                .edit(BlockEdit::Place {
                    pos: lamp_pos,
                    block: lamp,
                })
                .unwrap();
            requests_sent = true;
        }
        let moved = client.own_state().is_some_and(|s| s.position[2] < -0.5);
        if moved && heard_list && heard_change {
            break;
        }
    }

    let acknowledged = client.own_state().and_then(|s| s.last_input).unwrap();
    let queue = client.input_queue().unwrap();
    assert!(queue.history().iter().all(|s| s.sequence > acknowledged));
    assert!(server.ticks() > 0);

    client.disconnect();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "disconnect never completed");
        server.step().await.unwrap();
        if client.step(Duration::from_millis(1)).await.is_err() {
            break;
        }
    }

    let saved = server.shutdown().unwrap();
    assert!(saved >= 1);
    assert_eq!(fixture.map.get_block_at(lamp_pos).unwrap(), lamp);
}
