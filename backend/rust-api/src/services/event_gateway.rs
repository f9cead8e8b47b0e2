//! Applies room events arriving from the message bus. Each room gets one worker
//! task fed by a bounded channel, so events for a room apply in arrival order
//! while rooms proceed independently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use validator::Validate;

use crate::config::GatewaySettings;
use crate::error::{ArenaError, Result};
use crate::metrics::{record_room_event, ROOMS_ACTIVE};
use crate::models::room_event::{EventOutcome, GameState, InboundEvent, RoomEvent, RoomSnapshot};

enum RoomCommand {
    Apply {
        mode: String,
        event: RoomEvent,
        reply: oneshot::Sender<Result<EventOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

#[derive(Default)]
struct RoomState {
    room_id: String,
    snapshot: RoomSnapshot,
    /// (voter, topic) pairs already tallied
    votes: HashSet<(String, String)>,
}

impl RoomState {
    fn new(room_id: String) -> Self {
        Self {
            room_id,
            ..Self::default()
        }
    }

    /// Returns whether the event changed the room. Every check runs before the
    /// first write, so a rejected event leaves the room untouched.
    fn apply(&mut self, mode: &str, event: RoomEvent) -> Result<bool> {
        if let Some(current) = &self.snapshot.mode {
            if current != mode {
                return Err(ArenaError::validation(format!(
                    "room {} runs mode {}, got {}",
                    self.room_id, current, mode
                )));
            }
        }

        let applied = match event {
            RoomEvent::Vote(vote) => {
                if self.snapshot.state == GameState::Finished {
                    return Err(ArenaError::InvalidTransition(format!(
                        "room {} is finished and takes no votes",
                        self.room_id
                    )));
                }
                if !self.votes.insert((vote.voter_id, vote.topic.clone())) {
                    false
                } else {
                    *self
                        .snapshot
                        .tallies
                        .entry(vote.topic)
                        .or_default()
                        .entry(vote.choice)
                        .or_default() += 1;
                    true
                }
            }
            RoomEvent::State(change) => {
                let from = self.snapshot.state;
                if from == change.to {
                    false
                } else if !from.can_transition_to(change.to) {
                    return Err(ArenaError::InvalidTransition(format!(
                        "room {} cannot go from {:?} to {:?}",
                        self.room_id, from, change.to
                    )));
                } else {
                    self.snapshot.state = change.to;
                    true
                }
            }
        };

        if self.snapshot.mode.is_none() {
            self.snapshot.mode = Some(mode.to_string());
        }
        if applied {
            self.snapshot.events_applied += 1;
        }
        Ok(applied)
    }
}

struct RoomHandle {
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

type RoomRegistry = Arc<Mutex<HashMap<String, RoomHandle>>>;

struct RoomWorker {
    room: RoomState,
    generation: u64,
    registry: Weak<Mutex<HashMap<String, RoomHandle>>>,
    idle: Option<Duration>,
}

impl RoomWorker {
    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Apply { mode, event, reply } => {
                let kind = event.kind();
                let result = self.room.apply(&mode, event).map(|applied| EventOutcome {
                    room_id: self.room.room_id.clone(),
                    applied,
                    snapshot: self.room.snapshot.clone(),
                });
                let label = match &result {
                    Ok(outcome) if outcome.applied => "applied",
                    Ok(_) => "duplicate",
                    Err(_) => "rejected",
                };
                record_room_event(kind, label);
                // the caller may have given up waiting; the event still counts
                let _ = reply.send(result);
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot.clone());
            }
        }
    }

    /// Drops this worker's registry entry unless a newer room already took the id.
    fn unregister(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Ok(mut rooms) = registry.lock() {
            if rooms
                .get(&self.room.room_id)
                .is_some_and(|handle| handle.generation == self.generation)
            {
                rooms.remove(&self.room.room_id);
            }
        };
    }

    async fn run(mut self, mut commands: mpsc::Receiver<RoomCommand>) {
        ROOMS_ACTIVE.inc();
        tracing::debug!(room_id = %self.room.room_id, "Room worker started");

        loop {
            let next = match self.idle {
                Some(idle) => match tokio::time::timeout(idle, commands.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::debug!(room_id = %self.room.room_id, "Room idle, retiring");
                        break;
                    }
                },
                None => commands.recv().await,
            };
            match next {
                Some(command) => self.handle(command),
                None => break,
            }
        }

        self.unregister();
        // events queued before the entry went away still apply
        commands.close();
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }

        ROOMS_ACTIVE.dec();
        tracing::debug!(room_id = %self.room.room_id, "Room worker stopped");
    }
}

/// An event accepted by a room worker whose result has not been read yet.
pub struct PendingOutcome {
    room_id: String,
    response: oneshot::Receiver<Result<EventOutcome>>,
}

impl PendingOutcome {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn wait(self) -> Result<EventOutcome> {
        self.response
            .await
            .map_err(|_| ArenaError::storage(format!("room {} dropped the reply", self.room_id)))?
    }
}

pub struct EventGateway {
    settings: GatewaySettings,
    modes: HashSet<String>,
    rooms: RoomRegistry,
    generations: AtomicU64,
}

impl EventGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        let modes = settings.modes.iter().cloned().collect();
        Self {
            settings,
            modes,
            rooms: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Size-checks, parses and validates a raw bus message without touching any room.
    pub fn parse(&self, raw: &[u8]) -> Result<InboundEvent> {
        if raw.len() > self.settings.max_event_bytes {
            return Err(ArenaError::validation(format!(
                "event of {} bytes exceeds the {} byte limit",
                raw.len(),
                self.settings.max_event_bytes
            )));
        }

        let event: InboundEvent = serde_json::from_slice(raw)
            .map_err(|e| ArenaError::validation(format!("malformed event: {}", e)))?;
        event.validate()?;
        match &event.event {
            RoomEvent::Vote(vote) => vote.validate()?,
            RoomEvent::State(change) => change.validate()?,
        }
        if !self.modes.contains(&event.mode) {
            return Err(ArenaError::validation(format!(
                "unknown mode {}",
                event.mode
            )));
        }
        Ok(event)
    }

    pub async fn handle_raw(&self, raw: &[u8]) -> Result<EventOutcome> {
        let event = match self.parse(raw) {
            Ok(event) => event,
            Err(e) => {
                record_room_event("unknown", "malformed");
                return Err(e);
            }
        };
        self.dispatch(event).await
    }

    pub async fn dispatch(&self, event: InboundEvent) -> Result<EventOutcome> {
        self.submit(event).await?.wait().await
    }

    /// Queues the event on its room and returns without waiting for it to apply.
    /// Submitting in order from one task keeps the room's order.
    pub async fn submit(&self, event: InboundEvent) -> Result<PendingOutcome> {
        let InboundEvent {
            room_id,
            mode,
            event,
        } = event;
        let (reply, response) = oneshot::channel();
        let mut command = RoomCommand::Apply { mode, event, reply };
        // a worker retiring between lookup and send closes its channel; the
        // second lookup finds the entry gone and starts a fresh room
        for _ in 0..2 {
            let sender = self.room_sender(&room_id)?;
            match sender.send(command).await {
                Ok(()) => return Ok(PendingOutcome { room_id, response }),
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }
        Err(ArenaError::storage(format!("room {} worker stopped", room_id)))
    }

    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let sender = self.existing_sender(room_id)?;
        let (reply, response) = oneshot::channel();
        sender.send(RoomCommand::Snapshot { reply }).await.ok()?;
        response.await.ok()
    }

    /// Stops accepting events for the room. Queued events still apply before
    /// the worker exits; a later event starts a fresh room.
    pub fn close_room(&self, room_id: &str) -> bool {
        self.rooms
            .lock()
            .map(|mut rooms| rooms.remove(room_id).is_some())
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().map(|rooms| rooms.len()).unwrap_or(0)
    }

    fn existing_sender(&self, room_id: &str) -> Option<mpsc::Sender<RoomCommand>> {
        self.rooms
            .lock()
            .ok()?
            .get(room_id)
            .filter(|handle| !handle.tx.is_closed())
            .map(|handle| handle.tx.clone())
    }

    fn room_sender(&self, room_id: &str) -> Result<mpsc::Sender<RoomCommand>> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| ArenaError::storage("room registry poisoned"))?;
        if let Some(handle) = rooms.get(room_id).filter(|handle| !handle.tx.is_closed()) {
            return Ok(handle.tx.clone());
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.settings.room_queue_capacity.max(1));
        let worker = RoomWorker {
            room: RoomState::new(room_id.to_string()),
            generation,
            registry: Arc::downgrade(&self.rooms),
            idle: match self.settings.room_idle_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };
        tokio::spawn(worker.run(rx));
        rooms.insert(
            room_id.to_string(),
            RoomHandle {
                generation,
                tx: tx.clone(),
            },
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> EventGateway {
        EventGateway::new(GatewaySettings::default())
    }

    fn vote(room: &str, voter: &str, topic: &str, choice: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "roomId": room,
            "mode": "classic",
            "type": "vote",
            "payload": { "voter_id": voter, "topic": topic, "choice": choice }
        }))
        .unwrap()
    }

    fn state(room: &str, to: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "roomId": room,
            "mode": "classic",
            "type": "state",
            "payload": { "to": to }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn redelivered_vote_is_not_tallied_twice() {
        let gw = gateway();
        let first = gw.handle_raw(&vote("r1", "u1", "next", "yes")).await.unwrap();
        let again = gw.handle_raw(&vote("r1", "u1", "next", "no")).await.unwrap();

        assert!(first.applied);
        assert!(!again.applied);
        assert_eq!(again.snapshot.tallies["next"]["yes"], 1);
        assert!(!again.snapshot.tallies["next"].contains_key("no"));
        assert_eq!(again.snapshot.events_applied, 1);
    }

    #[tokio::test]
    async fn state_machine_rejects_illegal_jumps() {
        let gw = gateway();
        let err = gw.handle_raw(&state("r1", "FINISHED")).await.unwrap_err();
        assert!(err.is_invalid_state());

        for to in ["STARTING", "IN_PROGRESS", "PAUSED", "IN_PROGRESS", "FINISHED"] {
            assert!(gw.handle_raw(&state("r1", to)).await.unwrap().applied);
        }
        let repeat = gw.handle_raw(&state("r1", "FINISHED")).await.unwrap();
        assert!(!repeat.applied);
        assert_eq!(repeat.snapshot.state, GameState::Finished);

        let late = gw.handle_raw(&vote("r1", "u1", "t", "c")).await.unwrap_err();
        assert!(late.is_invalid_state());
    }

    #[tokio::test]
    async fn oversized_and_malformed_events_never_reach_a_room() {
        let gw = gateway();
        let huge = vote("r1", &"x".repeat(5000), "t", "c");
        assert!(matches!(
            gw.handle_raw(&huge).await.unwrap_err(),
            ArenaError::Validation(_)
        ));
        assert!(matches!(
            gw.handle_raw(b"{not json").await.unwrap_err(),
            ArenaError::Validation(_)
        ));
        let bad_mode = serde_json::to_vec(&json!({
            "roomId": "r1",
            "mode": "blitz",
            "type": "state",
            "payload": { "to": "STARTING" }
        }))
        .unwrap();
        assert!(gw.handle_raw(&bad_mode).await.is_err());
        assert_eq!(gw.room_count(), 0);
    }

    #[tokio::test]
    async fn empty_vote_fields_fail_validation() {
        let gw = gateway();
        let err = gw.handle_raw(&vote("r1", "", "t", "c")).await.unwrap_err();
        assert!(matches!(err, ArenaError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_in_one_room_all_count() {
        let gw = Arc::new(gateway());
        let mut tasks = Vec::new();
        for i in 0..50 {
            let gw = gw.clone();
            tasks.push(tokio::spawn(async move {
                gw.handle_raw(&vote("busy", &format!("u{}", i), "next", "yes"))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let snapshot = gw.snapshot("busy").await.unwrap();
        assert_eq!(snapshot.tallies["next"]["yes"], 50);
        assert_eq!(snapshot.events_applied, 50);
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let gw = gateway();
        gw.handle_raw(&state("a", "STARTING")).await.unwrap();
        let b = gw.handle_raw(&vote("b", "u1", "t", "c")).await.unwrap();
        assert_eq!(b.snapshot.state, GameState::Waiting);
        assert_eq!(gw.room_count(), 2);

        assert!(gw.close_room("a"));
        assert!(gw.snapshot("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_rooms_are_retired() {
        let gw = EventGateway::new(GatewaySettings {
            room_idle_secs: 60,
            ..GatewaySettings::default()
        });
        gw.handle_raw(&state("quiet", "STARTING")).await.unwrap();
        gw.handle_raw(&vote("chatty", "u1", "t", "c")).await.unwrap();
        assert_eq!(gw.room_count(), 2);

        tokio::time::sleep(Duration::from_secs(45)).await;
        gw.handle_raw(&vote("chatty", "u2", "t", "c")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(gw.room_count(), 1);
        assert!(gw.snapshot("quiet").await.is_none());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(gw.room_count(), 0);

        // the id comes back as a fresh room
        let reborn = gw.handle_raw(&vote("quiet", "u1", "t", "c")).await.unwrap();
        assert_eq!(reborn.snapshot.state, GameState::Waiting);
        assert_eq!(reborn.snapshot.events_applied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_idle_keeps_rooms_open() {
        let gw = EventGateway::new(GatewaySettings {
            room_idle_secs: 0,
            ..GatewaySettings::default()
        });
        gw.handle_raw(&state("r1", "STARTING")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(gw.snapshot("r1").await.unwrap().state, GameState::Starting);
    }
}
