//! Group Registry: two independent maps, own groups (no membership list) and
//! peer groups (member sets of peer identifier strings). Stores only
//! identifiers — the Node Runtime dereferences them through its peer map,
//! which avoids the reference cycle a direct peer<->group link would create.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct GroupRegistry {
    own: HashSet<String>,
    peer_groups: HashMap<String, HashSet<String>>,
}

impl GroupRegistry {
    /// Join `group` locally. Returns `true` if this was a new membership.
    pub fn join_own(&mut self, group: &str) -> bool {
        self.own.insert(group.to_string())
    }

    /// Leave `group` locally. Returns `true` if the group had been joined.
    pub fn leave_own(&mut self, group: &str) -> bool {
        self.own.remove(group)
    }

    pub fn is_in_own(&self, group: &str) -> bool {
        self.own.contains(group)
    }

    pub fn own_groups(&self) -> impl Iterator<Item = &String> {
        self.own.iter()
    }

    /// Add `peer` to `group`'s member set. Idempotent.
    pub fn join_peer(&mut self, group: &str, peer: &str) {
        self.peer_groups
            .entry(group.to_string())
            .or_default()
            .insert(peer.to_string());
    }

    /// Remove `peer` from `group`'s member set. Idempotent.
    pub fn leave_peer(&mut self, group: &str, peer: &str) {
        if let Some(members) = self.peer_groups.get_mut(group) {
            members.remove(peer);
        }
    }

    /// Identifiers of peers currently in `group`.
    pub fn members(&self, group: &str) -> impl Iterator<Item = &String> {
        self.peer_groups.get(group).into_iter().flatten()
    }

    /// Remove `peer` from every peer group it belongs to — used on peer
    /// expiry and on duplicate-endpoint purge.
    pub fn remove_peer_everywhere(&mut self, peer: &str) {
        for members in self.peer_groups.values_mut() {
            members.remove(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_group_join_leave_idempotent() {
        let mut reg = GroupRegistry::default();
        assert!(reg.join_own("chat"));
        assert!(!reg.join_own("chat"));
        assert!(reg.is_in_own("chat"));
        assert!(reg.leave_own("chat"));
        assert!(!reg.leave_own("chat"));
        assert!(!reg.is_in_own("chat"));
    }

    #[test]
    fn peer_group_membership() {
        let mut reg = GroupRegistry::default();
        reg.join_peer("chat", "AAAA");
        reg.join_peer("chat", "BBBB");
        let mut members: Vec<_> = reg.members("chat").cloned().collect();
        members.sort();
        assert_eq!(members, vec!["AAAA".to_string(), "BBBB".to_string()]);

        reg.leave_peer("chat", "AAAA");
        let members: Vec<_> = reg.members("chat").cloned().collect();
        assert_eq!(members, vec!["BBBB".to_string()]);
    }

    #[test]
    fn remove_peer_everywhere_clears_all_groups() {
        let mut reg = GroupRegistry::default();
        reg.join_peer("chat", "AAAA");
        reg.join_peer("dev", "AAAA");
        reg.remove_peer_everywhere("AAAA");
        assert_eq!(reg.members("chat").count(), 0);
        assert_eq!(reg.members("dev").count(), 0);
    }

    #[test]
    fn unknown_group_has_no_members() {
        let reg = GroupRegistry::default();
        assert_eq!(reg.members("nope").count(), 0);
    }
}
