use crate::{
    error::{TimelineError, TimelineErrorCategory},
    types::RoomLifecycleState,
};

/// Outcome of a room switch or logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTransition {
    /// Room that was active before the transition, if any.
    pub previous: Option<String>,
    /// Generation stamped on everything issued after the transition.
    pub generation: u64,
}

/// `NoRoom` / `Active(room)` state machine with a switch generation counter.
///
/// The generation is bumped on every transition. Listener deliveries and
/// pagination completions carry the generation they were issued under, so a
/// completion that outlives its room is recognised as stale.
#[derive(Debug, Clone, Default)]
pub struct RoomSwitchMachine {
    state: RoomLifecycleState,
    generation: u64,
}

impl RoomSwitchMachine {
    pub fn state(&self) -> &RoomLifecycleState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_room(&self) -> Option<&str> {
        self.state.room_id()
    }

    /// Whether a delivery stamped with `generation` still belongs to the
    /// current room.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.active_room().is_some()
    }

    /// Active room ID, or an error naming `action`.
    pub fn require_active(&self, action: &str) -> Result<&str, TimelineError> {
        self.active_room()
            .ok_or_else(|| TimelineError::no_active_room(action))
    }

    /// `NoRoom -> Active(room)` or `Active(r1) -> Active(room)`.
    pub fn switch_to(&mut self, room_id: &str) -> Result<RoomTransition, TimelineError> {
        if room_id.trim().is_empty() {
            return Err(TimelineError::new(
                TimelineErrorCategory::Config,
                "invalid_room_id",
                "room id must not be empty",
            ));
        }

        Ok(self.transition(RoomLifecycleState::Active {
            room_id: room_id.to_owned(),
        }))
    }

    /// `Active(room) -> NoRoom`. Logging out with no room is accepted and
    /// still invalidates outstanding deliveries.
    pub fn logout(&mut self) -> RoomTransition {
        self.transition(RoomLifecycleState::NoRoom)
    }

    fn transition(&mut self, next: RoomLifecycleState) -> RoomTransition {
        let previous = std::mem::replace(&mut self.state, next);
        self.generation = self.generation.wrapping_add(1);
        RoomTransition {
            previous: previous.room_id().map(ToOwned::to_owned),
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_between_rooms_and_bumps_generation() {
        let mut sm = RoomSwitchMachine::default();
        assert_eq!(sm.state(), &RoomLifecycleState::NoRoom);

        let first = sm.switch_to("!a:example.org").expect("switch should work");
        assert_eq!(first.previous, None);
        assert_eq!(sm.active_room(), Some("!a:example.org"));

        let second = sm.switch_to("!b:example.org").expect("switch should work");
        assert_eq!(second.previous.as_deref(), Some("!a:example.org"));
        assert!(second.generation > first.generation);
        assert_eq!(sm.active_room(), Some("!b:example.org"));
    }

    #[test]
    fn stale_generations_are_not_current() {
        let mut sm = RoomSwitchMachine::default();
        let a = sm.switch_to("!a:example.org").expect("switch a");
        assert!(sm.is_current(a.generation));

        let b = sm.switch_to("!b:example.org").expect("switch b");
        assert!(!sm.is_current(a.generation));
        assert!(sm.is_current(b.generation));

        let out = sm.logout();
        assert_eq!(out.previous.as_deref(), Some("!b:example.org"));
        assert!(!sm.is_current(b.generation));
        assert!(!sm.is_current(out.generation));
    }

    #[test]
    fn logout_without_room_is_accepted() {
        let mut sm = RoomSwitchMachine::default();
        let out = sm.logout();
        assert_eq!(out.previous, None);
        assert_eq!(sm.state(), &RoomLifecycleState::NoRoom);
    }

    #[test]
    fn rejects_empty_room_id() {
        let mut sm = RoomSwitchMachine::default();
        let err = sm.switch_to("  ").expect_err("empty room id must fail");
        assert_eq!(err.code, "invalid_room_id");
        assert_eq!(sm.generation(), 0);
    }

    #[test]
    fn require_active_reports_action() {
        let sm = RoomSwitchMachine::default();
        let err = sm
            .require_active("paginate_back")
            .expect_err("no room should fail");
        assert_eq!(err.code, "no_active_room");
    }
}
