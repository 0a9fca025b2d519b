// A plain container over a participant map, with a generation counter to
// let broadcast loops detect stale snapshots across membership changes.
//
// Grounded on the teacher's `Room { publishers: RwLock<HashMap<...>> }` in
// `room.rs` (lock-per-room, `snapshot`/`get_publishers` clones under the
// lock so fan-out never blocks joins), generalized from a publisher map
// to a generic participant map per spec §4.2.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::participant::{Participant, ParticipantId};

/// Consecutive delivery failures after which a participant is evicted
/// (spec §4.3's failure model).
pub const FAILURE_EVICTION_THRESHOLD: u32 = 3;

struct Entry {
    participant: Arc<Participant>,
    consecutive_failures: u32,
}

struct State {
    participants: HashMap<ParticipantId, Entry>,
    generation: u64,
}

/// A room groups participants together and fans audio/control out to
/// them. All mutation happens under a single lock held only for the
/// duration of the map operation -- never across I/O.
pub struct Room {
    pub room_id: String,
    state: RwLock<State>,
    generation_counter: AtomicU64,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            state: RwLock::new(State {
                participants: HashMap::new(),
                generation: 0,
            }),
            generation_counter: AtomicU64::new(0),
        }
    }

    /// Insert a participant. Idempotent on id: a second add with the
    /// same id replaces the prior entry, returning the participant that
    /// was displaced so the caller can close it out (outside any lock).
    /// Also reports, atomically with the insert, whether the room held
    /// no humans immediately before this participant was added -- the
    /// single critical section the auto-agent rule must be evaluated
    /// under, so two humans racing to join an empty room can't both see
    /// "I was first". Returns `(generation, was_empty_of_humans_before, displaced)`.
    pub fn add(&self, participant: Arc<Participant>) -> (u64, bool, Option<Arc<Participant>>) {
        let mut state = self.state.write().unwrap();
        let was_empty_of_humans = state.participants.values().all(|e| e.participant.is_agent());
        let prior = state
            .participants
            .insert(
                participant.handle().id().clone(),
                Entry {
                    participant,
                    consecutive_failures: 0,
                },
            )
            .map(|e| e.participant);
        state.generation += 1;
        let generation = state.generation;
        drop(state);
        self.generation_counter.store(generation, Ordering::SeqCst);
        (generation, was_empty_of_humans, prior)
    }

    /// Remove a participant by id. Returns the removed participant, if
    /// any, so the caller can decide whether it was an agent task.
    pub fn remove(&self, id: &str) -> Option<Arc<Participant>> {
        let mut state = self.state.write().unwrap();
        let removed = state.participants.remove(id).map(|e| e.participant);
        if removed.is_some() {
            state.generation += 1;
            self.generation_counter.store(state.generation, Ordering::SeqCst);
        }
        removed
    }

    /// Shallow copy of every participant, safe to iterate without
    /// holding the room lock.
    pub fn snapshot(&self) -> Vec<Arc<Participant>> {
        let state = self.state.read().unwrap();
        state.participants.values().map(|e| e.participant.clone()).collect()
    }

    /// True once every remaining participant is an agent (or the room is
    /// fully empty).
    pub fn is_empty_of_humans(&self) -> bool {
        let state = self.state.read().unwrap();
        state.participants.values().all(|e| e.participant.is_agent())
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read().unwrap();
        state.participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.state.read().unwrap().participants.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation_counter.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().unwrap().participants.contains_key(id)
    }

    /// Record a delivery failure for `id`. Returns `true` once the
    /// consecutive-failure count reaches `FAILURE_EVICTION_THRESHOLD`,
    /// signalling the caller should evict the participant.
    pub fn record_failure(&self, id: &str) -> bool {
        let mut state = self.state.write().unwrap();
        if let Some(entry) = state.participants.get_mut(id) {
            entry.consecutive_failures += 1;
            entry.consecutive_failures >= FAILURE_EVICTION_THRESHOLD
        } else {
            false
        }
    }

    /// Reset the failure count for `id` after a successful delivery.
    pub fn record_success(&self, id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(entry) = state.participants.get_mut(id) {
            entry.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::AgentParticipant;
    use tokio::sync::mpsc;

    fn agent(id: &str) -> Arc<Participant> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Participant::Agent(AgentParticipant::new(
            id.to_string(),
            format!("AI-{id}"),
            tx,
        )))
    }

    #[test]
    fn add_is_idempotent_and_replaces() {
        let room = Room::new("r1");
        let (gen1, was_empty1, prior1) = room.add(agent("a"));
        assert_eq!(gen1, 1);
        assert!(was_empty1);
        assert!(prior1.is_none());

        let (gen2, was_empty2, prior2) = room.add(agent("a"));
        assert_eq!(gen2, 2);
        assert!(was_empty2);
        assert!(prior2.is_some());
        assert_eq!(room.participant_count(), 1);
    }

    #[test]
    fn add_reports_was_empty_of_humans_before_insert() {
        let room = Room::new("r1");
        room.add(agent("a"));
        let (_, was_empty, _) = room.add(agent("b"));
        assert!(was_empty, "room held only an agent before this insert");
    }

    #[test]
    fn remove_reports_presence() {
        let room = Room::new("r1");
        room.add(agent("a"));
        assert!(room.remove("a").is_some());
        assert!(room.remove("a").is_none());
    }

    #[test]
    fn unique_ids_invariant_holds_after_churn() {
        let room = Room::new("r1");
        for i in 0..5 {
            room.add(agent(&format!("p{i}")));
        }
        room.remove("p2");
        let ids: Vec<_> = room
            .snapshot()
            .iter()
            .map(|p| p.handle().id().clone())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids.len(), sorted.len());
    }

    #[test]
    fn is_empty_of_humans_true_when_only_agents_remain() {
        let room = Room::new("r1");
        room.add(agent("a"));
        assert!(room.is_empty_of_humans());
    }

    #[test]
    fn three_consecutive_failures_signal_eviction() {
        let room = Room::new("r1");
        room.add(agent("a"));
        assert!(!room.record_failure("a"));
        assert!(!room.record_failure("a"));
        assert!(room.record_failure("a"));
    }

    #[test]
    fn success_resets_failure_streak() {
        let room = Room::new("r1");
        room.add(agent("a"));
        room.record_failure("a");
        room.record_failure("a");
        room.record_success("a");
        assert!(!room.record_failure("a"));
        assert!(!room.record_failure("a"));
        assert!(room.record_failure("a"));
    }
}
