use std::collections::HashMap;

/// User-initiated chat operations whose outcome the UI reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Send,
    Edit,
    Delete,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Succeeded,
    Failed(String),
}

impl ActionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub type ActionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Message the action targets, when it targets one.
    pub target: Option<String>,
    pub state: ActionState,
}

/// Pending -> Succeeded | Failed. Finished actions are kept until cleared
/// so failures stay visible.
#[derive(Debug, Default)]
pub struct ActionTracker {
    next_id: ActionId,
    actions: HashMap<ActionId, Action>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, kind: ActionKind, target: Option<&str>) -> ActionId {
        self.next_id += 1;
        let id = self.next_id;
        self.actions.insert(
            id,
            Action {
                id,
                kind,
                target: target.map(str::to_owned),
                state: ActionState::Pending,
            },
        );
        id
    }

    pub fn succeed(&mut self, id: ActionId) {
        self.finish(id, ActionState::Succeeded);
    }

    pub fn fail(&mut self, id: ActionId, reason: impl Into<String>) {
        self.finish(id, ActionState::Failed(reason.into()));
    }

    // Only pending actions move; a finished state is final.
    fn finish(&mut self, id: ActionId, state: ActionState) {
        if let Some(action) = self.actions.get_mut(&id)
            && action.state == ActionState::Pending
        {
            action.state = state;
        }
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(&id)
    }

    pub fn state(&self, id: ActionId) -> Option<&ActionState> {
        self.actions.get(&id).map(|a| &a.state)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Action> {
        self.actions.values().filter(|a| a.state == ActionState::Pending)
    }

    /// Failed actions, oldest first.
    pub fn failures(&self) -> Vec<&Action> {
        let mut failed: Vec<&Action> = self.actions.values().filter(|a| a.state.is_failed()).collect();
        failed.sort_by_key(|a| a.id);
        failed
    }

    /// Drop finished actions.
    pub fn clear_finished(&mut self) {
        self.actions.retain(|_, a| a.state == ActionState::Pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_once() {
        let mut tracker = ActionTracker::new();
        let send = tracker.start(ActionKind::Send, None);
        let delete = tracker.start(ActionKind::Delete, Some("m1"));
        assert_eq!(tracker.pending().count(), 2);

        tracker.succeed(send);
        tracker.fail(send, "late");
        assert_eq!(tracker.state(send), Some(&ActionState::Succeeded));

        tracker.fail(delete, "offline");
        let failures = tracker.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target.as_deref(), Some("m1"));
        assert_eq!(failures[0].state, ActionState::Failed("offline".into()));

        tracker.clear_finished();
        assert!(tracker.get(delete).is_none());
    }
}
