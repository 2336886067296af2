//! Callgroup to worker assignment

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::types::{Callgroup, MediaSessionId};

/// Bookkeeping of which worker owns which callgroup
///
/// Worker load is the number of callgroups assigned to it. A callgroup stays
/// on its worker until its last member leaves.
#[derive(Debug)]
pub(crate) struct CallgroupMap {
    thread_of: HashMap<Callgroup, usize>,
    members: HashMap<Callgroup, HashSet<MediaSessionId>>,
    callgroup_of: HashMap<MediaSessionId, Callgroup>,
    load: Vec<usize>,
}

impl CallgroupMap {
    pub(crate) fn new(threads: usize) -> Self {
        Self {
            thread_of: HashMap::new(),
            members: HashMap::new(),
            callgroup_of: HashMap::new(),
            load: vec![0; threads.max(1)],
        }
    }

    /// Worker for `session` in `callgroup`, assigning the least loaded
    /// worker to a new callgroup
    pub(crate) fn assign(&mut self, session: &MediaSessionId, callgroup: &str) -> usize {
        let thread = match self.thread_of.get(callgroup) {
            Some(&thread) => thread,
            None => {
                let thread = self
                    .load
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, load)| **load)
                    .map(|(index, _)| index)
                    .unwrap_or(0);
                self.load[thread] += 1;
                self.thread_of.insert(callgroup.to_string(), thread);
                trace!("Callgroup {} assigned to worker {}", callgroup, thread);
                thread
            }
        };

        self.members
            .entry(callgroup.to_string())
            .or_default()
            .insert(session.clone());
        self.callgroup_of.insert(session.clone(), callgroup.to_string());
        thread
    }

    /// Forget `session`; returns its worker if it was known
    pub(crate) fn release(&mut self, session: &MediaSessionId) -> Option<usize> {
        let callgroup = self.callgroup_of.remove(session)?;
        let thread = self.thread_of.get(&callgroup).copied()?;

        let emptied = match self.members.get_mut(&callgroup) {
            Some(members) => {
                members.remove(session);
                members.is_empty()
            }
            None => true,
        };
        if emptied {
            self.members.remove(&callgroup);
            self.thread_of.remove(&callgroup);
            self.load[thread] = self.load[thread].saturating_sub(1);
            trace!("Callgroup {} released from worker {}", callgroup, thread);
        }
        Some(thread)
    }

    pub(crate) fn thread_of(&self, callgroup: &str) -> Option<usize> {
        self.thread_of.get(callgroup).copied()
    }

    pub(crate) fn contains(&self, session: &MediaSessionId) -> bool {
        self.callgroup_of.contains_key(session)
    }

    pub(crate) fn loads(&self) -> Vec<usize> {
        self.load.clone()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.callgroup_of.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MediaSessionId {
        MediaSessionId::new(s)
    }

    #[test]
    fn test_new_callgroups_spread_over_workers() {
        let mut map = CallgroupMap::new(3);
        let threads: Vec<usize> = (0..3).map(|i| map.assign(&id(&format!("s{i}")), &format!("g{i}"))).collect();

        let mut sorted = threads.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
        assert_eq!(map.loads(), vec![1, 1, 1]);
    }

    #[test]
    fn test_callgroup_is_sticky_and_counted_once() {
        let mut map = CallgroupMap::new(2);
        let first = map.assign(&id("s1"), "g");
        let second = map.assign(&id("s2"), "g");
        assert_eq!(first, second);
        assert_eq!(map.loads().iter().sum::<usize>(), 1);

        assert_eq!(map.release(&id("s1")), Some(first));
        assert_eq!(map.thread_of("g"), Some(first));
        assert_eq!(map.release(&id("s2")), Some(first));
        assert_eq!(map.thread_of("g"), None);
        assert_eq!(map.loads(), vec![0, 0]);
        assert_eq!(map.release(&id("s2")), None);
    }
}
