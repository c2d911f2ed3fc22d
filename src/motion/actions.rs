// src/motion/actions.rs - Named body actions on the cyclic timeline
use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::config::ActionDescriptor;
use crate::motion::planner::plan_move;

impl ActionDescriptor {
    /// Order the two boundaries so the nearer one (by shortest cyclic move from
    /// `current`) comes first. Ties approach `start` first.
    pub fn traversal_from(&self, current: u16, cycle_length: u16) -> (u16, u16) {
        let to_start = plan_move(current, i32::from(self.start), cycle_length).duration;
        let to_end = plan_move(current, i32::from(self.end), cycle_length).duration;
        if to_end < to_start {
            (self.end, self.start)
        } else {
            (self.start, self.end)
        }
    }
}

/// Immutable table of named actions.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: BTreeMap<String, ActionDescriptor>,
    names: Vec<String>,
}

impl ActionTable {
    pub fn new(actions: BTreeMap<String, ActionDescriptor>) -> Self {
        let names = actions.keys().cloned().collect();
        Self { actions, names }
    }

    pub fn get(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.names.choose(rng).map(String::as_str)
    }
}
