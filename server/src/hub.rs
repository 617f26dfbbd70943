//! Player registry and tick-driven broadcast
//!
//! The hub is an actor: a single task owns the registry and processes
//! register, unregister and broadcast commands in arrival order, interleaved
//! with its tick timer. Nothing else ever touches the registry, so it needs no
//! lock.
//!
//! Broadcast never waits on a player. A player whose outbound queue is full
//! has fallen behind and is evicted on the spot.

use crate::config::ServerConfig;
use crate::game::Game;
use crate::player::{Outbox, Payload, PlayerId, SendError};
use log::{debug, error, info, warn};
use shared::{GameStats, Message};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Commands accepted by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    Register { id: PlayerId, outbox: Outbox },
    Unregister { id: PlayerId },
    Broadcast { payload: Payload },
}

#[derive(Debug, thiserror::Error)]
#[error("hub is no longer running")]
pub struct HubClosed;

/// Cloneable handle for sending commands to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, id: PlayerId, outbox: Outbox) -> Result<(), HubClosed> {
        self.send(HubCommand::Register { id, outbox }).await
    }

    pub async fn unregister(&self, id: PlayerId) -> Result<(), HubClosed> {
        self.send(HubCommand::Unregister { id }).await
    }

    /// Queues `payload` for every player, from outside the hub task.
    ///
    /// The tick runs inside the hub and calls [`Hub::broadcast`] directly;
    /// this is the entry point for any other producer.
    pub async fn broadcast(&self, payload: Payload) -> Result<(), HubClosed> {
        self.send(HubCommand::Broadcast { payload }).await
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubClosed> {
        self.commands.send(command).await.map_err(|_| HubClosed)
    }
}

pub struct Hub {
    game: Arc<Game>,
    players: HashMap<PlayerId, Outbox>,
    commands: mpsc::Receiver<HubCommand>,
    tick_duration: Duration,
}

impl Hub {
    pub fn new(game: Arc<Game>, config: &ServerConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.hub_command_capacity);
        let hub = Self {
            game,
            players: HashMap::new(),
            commands: rx,
            tick_duration: config.tick_duration,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Starts the hub on its own task and returns a handle to it.
    pub fn spawn(game: Arc<Game>, config: &ServerConfig) -> HubHandle {
        let (hub, handle) = Self::new(game, config);
        tokio::spawn(hub.run());
        handle
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        info!("Hub started, tick every {:?}", self.tick_duration);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("Hub shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    pub fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { id, outbox } => self.register(id, outbox),
            HubCommand::Unregister { id } => {
                self.unregister(id);
            }
            HubCommand::Broadcast { payload } => {
                self.broadcast(payload);
            }
        }
    }

    pub fn register(&mut self, id: PlayerId, outbox: Outbox) {
        self.players.insert(id, outbox);
        info!("Player {} registered ({} online)", id, self.players.len());
    }

    /// Removes a player and closes its outbound queue.
    ///
    /// Returns false if the player was not registered, e.g. already evicted.
    pub fn unregister(&mut self, id: PlayerId) -> bool {
        match self.players.remove(&id) {
            Some(outbox) => {
                outbox.close();
                info!("Player {} unregistered ({} online)", id, self.players.len());
                true
            }
            None => false,
        }
    }

    /// Queues `payload` for every registered player without waiting.
    ///
    /// Players with a full queue are evicted. Returns how many players the
    /// payload was queued for.
    pub fn broadcast(&mut self, payload: Payload) -> usize {
        let mut delivered = 0;
        self.players.retain(|id, outbox| match outbox.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(SendError::Full) => {
                warn!("Player {} is not keeping up, evicting", id);
                outbox.close();
                false
            }
            Err(SendError::Closed) => {
                debug!("Player {} queue already closed, dropping", id);
                false
            }
        });
        delivered
    }

    /// Closes the current tick window and broadcasts its stats.
    pub fn tick(&mut self) {
        let recently_uncovered = self.game.take_recent_uncovers();
        let stats = GameStats {
            uncovered_count: self.game.uncovered_count(),
            online_count: u32::try_from(self.players.len()).unwrap_or(u32::MAX),
            gold_positions: Vec::new(),
            recently_uncovered,
        };

        match Message::GameStats(stats).to_bytes() {
            Ok(bytes) => {
                self.broadcast(Payload::from(bytes));
            }
            Err(e) => error!("Failed to encode game stats, skipping tick: {}", e),
        }
    }

    pub fn online_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_registered(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }
}
