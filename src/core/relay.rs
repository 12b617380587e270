// src/core/relay.rs

//! The authoritative single-writer event loop.
//!
//! `Relay` is the state machine: it owns the client and ban registries and is the
//! only code that mutates them. `EventLoop` is the task that feeds it events from
//! the queue, one at a time, so no registry access ever happens concurrently.

use super::auth::ClientRole;
use super::bans::{BanRegistry, BanStatus};
use super::commands::{AdminCommand, BanTarget};
use super::errors::RelayError;
use super::events::{EventReceiver, RelayEvent};
use super::handle::ConnectionHandle;
use super::identity::SessionId;
use super::metrics;
use super::registry::ClientRegistry;
use crate::config::PolicyConfig;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const SHUTDOWN_LINE: &str = "Server is shutting down";
pub const KICKED_LINE: &str = "You have been removed by an operator";
pub const COMMAND_USAGE: &str = "Usage: !ban <session-id|address>";

/// Which rule a strike was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeReason {
    /// Two messages closer together than the configured message rate.
    Rate,
    /// A payload that is not valid UTF-8 text.
    Content,
}

impl StrikeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrikeReason::Rate => "rate",
            StrikeReason::Content => "content",
        }
    }
}

/// Whole seconds, rounded up, so a client is never told "0 seconds left" while still banned.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs_f64().ceil() as u64
}

/// The relay state machine. Every state transition goes through `handle`.
#[derive(Debug)]
pub struct Relay {
    clients: ClientRegistry,
    bans: BanRegistry,
    policy: PolicyConfig,
}

impl Relay {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            clients: ClientRegistry::new(),
            bans: BanRegistry::new(policy.ban_duration),
            policy,
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Applies one event at the instant `now`.
    pub fn handle(&mut self, event: RelayEvent, now: Instant) {
        match event {
            RelayEvent::Connected { conn, role } => self.on_connected(conn, role, now),
            RelayEvent::Disconnected { conn } => self.on_disconnected(conn, now),
            RelayEvent::NewMessage { conn, payload } => self.on_message(conn, payload, now),
            RelayEvent::Command { conn, payload } => self.on_command(conn, payload),
        }
        metrics::REGISTERED_CLIENTS.set(self.clients.len() as f64);
        metrics::ACTIVE_BANS.set(self.bans.len() as f64);
    }

    fn on_connected(&mut self, conn: ConnectionHandle, role: ClientRole, now: Instant) {
        let identity = conn.identity();
        let session_id = identity.session_id();
        let key = identity.ban_key(self.policy.ban_scope);

        match self.bans.status(&key, now) {
            BanStatus::Active { remaining } => {
                let seconds = whole_seconds(remaining);
                info!("Refusing {}: banned, {}s left.", identity, seconds);
                self.clients.remove(session_id);
                let _ = conn.send_line(&format!("You are banned, {seconds} seconds left"));
                conn.close();
                return;
            }
            BanStatus::Expired => {
                debug!("Ban on {} has expired, admitting {}.", key, identity);
                self.bans.lift(&key);
                if let Some(stale) = self.clients.remove(session_id) {
                    stale.conn.close();
                }
            }
            BanStatus::Clear => {
                if self.clients.contains(session_id) {
                    debug!("{} is already registered, ignoring duplicate connect.", identity);
                    return;
                }
            }
        }

        let welcome = match role {
            ClientRole::Member => format!("Welcome to the relay! You are {identity}"),
            ClientRole::Operator => format!("Welcome to the relay, operator! You are {identity}"),
        };
        if let Err(e) = conn.send_line(&welcome) {
            debug!("Could not queue welcome for {}: {}", identity, e);
        }
        self.clients.register(conn, role, now);
        info!("{} connected as {:?}.", identity, role);
    }

    fn on_disconnected(&mut self, conn: ConnectionHandle, now: Instant) {
        let identity = conn.identity();
        if let Some(client) = self.clients.remove(identity.session_id()) {
            info!(
                "{} disconnected after {:?} with {} strikes.",
                identity,
                now.saturating_duration_since(client.connected_at),
                client.strikes
            );
        } else {
            debug!("{} disconnected without being registered.", identity);
        }
        conn.close();
    }

    fn on_message(&mut self, conn: ConnectionHandle, payload: Bytes, now: Instant) {
        let identity = conn.identity();
        let session_id = identity.session_id();

        let Some(client) = self.clients.get(session_id) else {
            debug!("Message from unregistered {}, closing connection.", identity);
            conn.close();
            return;
        };

        if now.saturating_duration_since(client.last_message) < self.policy.message_rate {
            self.strike(session_id, StrikeReason::Rate, now);
            return;
        }

        if std::str::from_utf8(&payload).is_err() {
            self.strike(session_id, StrikeReason::Content, now);
            return;
        }

        if let Some(client) = self.clients.get_mut(session_id) {
            client.last_message = now;
        }
        let delivered = self.broadcast(session_id, payload);
        debug!("Message from {} relayed to {} clients.", identity, delivered);
    }

    fn on_command(&mut self, conn: ConnectionHandle, payload: Bytes) {
        let identity = conn.identity();
        let Some(role) = self.clients.get(identity.session_id()).map(|c| c.role) else {
            debug!("Command from unregistered {}, closing connection.", identity);
            conn.close();
            return;
        };

        let parsed = AdminCommand::parse(&payload);
        if let Err(RelayError::UnknownCommand(name)) = &parsed {
            debug!("Ignoring unknown command '{}' from {}.", name, identity);
            return;
        }
        if role != ClientRole::Operator {
            warn!("{} sent a command without operator rights.", identity);
            let _ = conn.send_line(&RelayError::NoPermission.to_string());
            return;
        }

        match parsed {
            Ok(AdminCommand::Ban(target)) => self.kick(&conn, target),
            Err(e) => {
                let _ = conn.send_line(&format!("{e}. {COMMAND_USAGE}"));
            }
        }
    }

    /// Removes `target` from the registry without recording a ban. The target's
    /// connection stays open until it next speaks, at which point it is closed as
    /// an unregistered client.
    fn kick(&mut self, operator: &ConnectionHandle, target: BanTarget) {
        let Some(victim) = self
            .clients
            .find(&target)
            .and_then(|session_id| self.clients.remove(session_id))
        else {
            let _ = operator.send_line(&format!("No such client: {target}"));
            return;
        };

        info!(
            "Operator {} removed {} from the relay.",
            operator.identity(),
            victim.identity()
        );
        let _ = victim.conn.send_line(KICKED_LINE);
        let _ = operator.send_line(&format!("Removed {}", victim.identity()));
    }

    /// Records a strike and bans the client once the limit is reached.
    fn strike(&mut self, session_id: SessionId, reason: StrikeReason, now: Instant) {
        let limit = self.policy.ban_limit;
        let Some(client) = self.clients.get_mut(session_id) else {
            return;
        };
        client.strikes += 1;
        let strikes = client.strikes;
        metrics::STRIKES_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        debug!(
            "Strike {}/{} ({}) for {}.",
            strikes,
            limit,
            reason.as_str(),
            client.identity()
        );

        if reason == StrikeReason::Rate {
            let _ = client
                .conn
                .send_line(&format!("Slow down! (strike {strikes}/{limit})"));
        }

        if strikes >= limit {
            self.ban(session_id, now);
        }
    }

    /// Bans a registered client, closes it, and evicts every other session under the same ban key.
    fn ban(&mut self, session_id: SessionId, now: Instant) {
        let Some(client) = self.clients.remove(session_id) else {
            return;
        };
        let scope = self.policy.ban_scope;
        let identity = client.identity();
        let key = identity.ban_key(scope);
        let seconds = whole_seconds(self.bans.duration());

        self.bans.ban(key, now);
        metrics::BANS_TOTAL.inc();
        warn!(
            "Banned {} ({}) for {}s after {} strikes.",
            identity, key, seconds, client.strikes
        );
        let _ = client
            .conn
            .send_line(&format!("Too many violations, banned for {seconds} seconds"));
        client.conn.close();

        // Operators already connected from the banned key keep their session.
        for other in self.clients.sessions_with_ban_key(key, scope) {
            if self
                .clients
                .get(other)
                .is_some_and(|state| state.role == ClientRole::Operator)
            {
                debug!("Sparing operator session {} on banned key {}.", other, key);
                continue;
            }
            if let Some(evicted) = self.clients.remove(other) {
                info!("Evicting {} which shares banned key {}.", evicted.identity(), key);
                let _ = evicted
                    .conn
                    .send_line(&format!("You are banned, {seconds} seconds left"));
                evicted.conn.close();
            }
        }
    }

    /// Queues `payload` for every registered client other than the sender.
    /// Returns how many outboxes accepted it.
    fn broadcast(&mut self, sender: SessionId, payload: Bytes) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for client in self.clients.recipients_except(sender) {
            match client.conn.deliver(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(RelayError::OutboxFull) => {
                    metrics::DELIVERIES_DROPPED_TOTAL.inc();
                    warn!("Outbox full for {}, dropping message.", client.identity());
                }
                Err(_) => gone.push(client.identity().session_id()),
            }
        }

        for session_id in gone {
            if let Some(client) = self.clients.remove(session_id) {
                debug!("{} stopped accepting writes, removing.", client.identity());
                client.conn.close();
            }
        }

        metrics::MESSAGES_BROADCAST_TOTAL.inc();
        delivered
    }

    /// Drops ban entries whose window has elapsed.
    pub fn purge_expired_bans(&mut self, now: Instant) -> usize {
        let purged = self.bans.purge_expired(now);
        metrics::ACTIVE_BANS.set(self.bans.len() as f64);
        purged
    }

    /// Notifies and closes every registered client, leaving the registry empty.
    pub fn shutdown(&mut self) {
        let clients = self.clients.drain();
        info!("Closing {} registered clients.", clients.len());
        for client in clients {
            let _ = client.conn.send_line(SHUTDOWN_LINE);
            client.conn.close();
        }
        metrics::REGISTERED_CLIENTS.set(0.0);
    }
}

/// The task that owns the `Relay` and consumes the event queue.
pub struct EventLoop {
    relay: Relay,
    rx: EventReceiver,
}

impl EventLoop {
    pub fn new(policy: PolicyConfig, rx: EventReceiver) -> Self {
        Self {
            relay: Relay::new(policy),
            rx,
        }
    }

    /// Runs until global shutdown, or until every event sender is gone.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Relay event loop started.");
        let mut purge_interval = tokio::time::interval(self.relay.policy().ban_purge_interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Relay event loop shutting down.");
                    break;
                }
                maybe_event = self.rx.recv() => {
                    let Some(event) = maybe_event else {
                        info!("All event senders dropped, relay event loop exiting.");
                        break;
                    };
                    debug!("Handling {} event from {}.", event.kind(), event.identity());
                    let timer = metrics::EVENT_LATENCY_SECONDS.start_timer();
                    self.relay.handle(event, Instant::now());
                    timer.observe_duration();
                }
                _ = purge_interval.tick() => {
                    self.relay.purge_expired_bans(Instant::now());
                }
            }
        }

        self.relay.shutdown();
    }
}
