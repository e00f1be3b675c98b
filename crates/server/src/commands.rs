//! Slash commands typed into chat.
//!
//! Handlers live in an engine [`Registry`] whose fallback rejects the line, so
//! an unknown command is just another handler failure.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use cubesync_engine::registry::Registry;
use cubesync_engine::world::Map;
use cubesync_engine::world::block::BlockId;
use cubesync_engine::world::position::BlockPos;
use indexmap::IndexMap;
use vek::Vec3;

use crate::actor::{Actor, ActorId};
use crate::message::ServerMessage;

type Handler = dyn Fn(&mut CommandContext<'_>, &[&str]) -> Result<()> + Send + Sync;

/// What a handler may touch. Runs on the tick thread.
pub struct CommandContext<'a> {
    pub map: &'a Map,
    pub actors: &'a mut IndexMap<ActorId, Actor>,
    pub sender: ActorId,
    replies: Vec<String>,
    broadcasts: Vec<ServerMessage>,
}

impl<'a> CommandContext<'a> {
    pub fn new(map: &'a Map, actors: &'a mut IndexMap<ActorId, Actor>, sender: ActorId) -> Self {
        Self {
            map,
            actors,
            sender,
            replies: Vec::new(),
            broadcasts: Vec::new(),
        }
    }

    /// Send a line back to the sender only.
    pub fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(text.into());
    }

    /// Send a message to every client.
    pub fn broadcast(&mut self, message: ServerMessage) {
        self.broadcasts.push(message);
    }

    pub fn sender_actor(&mut self) -> Result<&mut Actor> {
        let sender = self.sender;
        self.actors
            .get_mut(&sender)
            .ok_or_else(|| anyhow!("actor {sender} is not in the world"))
    }

    /// Replies and broadcasts produced so far.
    pub fn into_output(self) -> (Vec<String>, Vec<ServerMessage>) {
        (self.replies, self.broadcasts)
    }
}

#[derive(Clone)]
pub struct Command {
    pub usage: String,
    pub help: String,
    handler: Arc<Handler>,
}

impl Command {
    pub fn new(
        usage: impl Into<String>,
        help: impl Into<String>,
        handler: impl Fn(&mut CommandContext<'_>, &[&str]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            usage: usage.into(),
            help: help.into(),
            handler: Arc::new(handler),
        }
    }
}

pub struct CommandRegistry {
    commands: Registry<String, Command>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// An empty registry. Only `/help` is answered.
    pub fn new() -> Self {
        Self {
            commands: Registry::new(Command::new("", "", |_, _| bail!("unknown command"))),
        }
    }

    /// `/list`, `/tp` and `/setblock`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("list", Command::new("/list", "Show who is online", list));
        registry.register("tp", Command::new("/tp <x> <y> <z>", "Teleport yourself", teleport));
        registry.register(
            "setblock",
            Command::new("/setblock <x> <y> <z> <block>", "Place a block by id", set_block),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, command: Command) {
        self.commands.insert(name.into(), command);
    }

    pub fn contains(&self, name: &str) -> bool {
        name == "help" || self.commands.contains_key(name)
    }

    /// Run one chat line starting with `/`.
    pub fn execute(&self, ctx: &mut CommandContext<'_>, line: &str) -> Result<()> {
        let mut words = line.trim().trim_start_matches('/').split_whitespace();
        let Some(name) = words.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = words.collect();

        if name == "help" {
            let mut usages: Vec<(&str, &str)> = self
                .commands
                .iter()
                .map(|(_, c)| (c.usage.as_str(), c.help.as_str()))
                .collect();
            usages.sort_unstable();
            ctx.reply("/help - List commands");
            for (usage, help) in usages {
                ctx.reply(format!("{usage} - {help}"));
            }
            return Ok(());
        }

        let command = self.commands.get(name);
        (command.handler)(ctx, &args).with_context(|| format!("/{name}"))
    }
}

fn list(ctx: &mut CommandContext<'_>, _args: &[&str]) -> Result<()> {
    let names: Vec<&str> = ctx.actors.values().map(|a| a.name.as_str()).collect();
    let line = format!("{} online: {}", names.len(), names.join(", "));
    ctx.reply(line);
    Ok(())
}

fn parse_args<const N: usize, T: std::str::FromStr>(args: &[&str], usage: &str) -> Result<[T; N]> {
    if args.len() < N {
        bail!("usage: {usage}");
    }
    let mut parsed = Vec::with_capacity(N);
    for arg in &args[..N] {
        parsed.push(
            arg.parse::<T>()
                .map_err(|_| anyhow!("'{arg}' is not a number; usage: {usage}"))?,
        );
    }
    parsed
        .try_into()
        .map_err(|_| anyhow!("usage: {usage}"))
}

fn teleport(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<()> {
    let [x, y, z] = parse_args::<3, f32>(args, "/tp <x> <y> <z>")?;
    let actor = ctx.sender_actor()?;
    actor.position = Vec3::new(x, y, z);
    let line = format!("Teleported to {x} {y} {z}");
    ctx.reply(line);
    Ok(())
}

fn set_block(ctx: &mut CommandContext<'_>, args: &[&str]) -> Result<()> {
    const USAGE: &str = "/setblock <x> <y> <z> <block>";
    let [x, y, z] = parse_args::<3, i32>(args, USAGE)?;
    let Some(name) = args.get(3) else {
        bail!("usage: {USAGE}");
    };
    let block = ctx.map.referrer().id_of(name);
    if block == BlockId::UNKNOWN || block == BlockId::OUT_OF_BOUNDS {
        bail!("unknown block '{name}'");
    }

    let pos = BlockPos::new(x, y, z);
    if block == BlockId::AIR {
        ctx.map.break_block(pos, Some(ctx.sender))?;
    } else {
        ctx.map.place_block(pos, block, Some(ctx.sender))?;
    }
    let block = ctx.map.get_block_at(pos)?;
    ctx.broadcast(ServerMessage::BlockChanged { pos, block });
    ctx.reply(format!("Set {x} {y} {z} to {name}"));
    Ok(())
}
