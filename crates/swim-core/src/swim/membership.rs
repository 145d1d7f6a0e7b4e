//! Membership list for tracking known cluster members.
//!
//! The membership list is the core data structure for SWIM. It tracks:
//! - The local member and every known remote member
//! - Their current status (Alive, Suspect) and incarnation numbers
//! - Tombstones for removed members, so stale gossip cannot resurrect them
//!
//! All merge rules live here. Callers get back an [`Applied`] verdict and
//! decide what to disseminate; the list itself never touches the network.

use super::{GossipEvent, GossipKind, MemberInfo, MemberSnapshot, MemberStatus};
use crate::MemberId;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// A member in the membership list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Identity and address
    pub info: MemberInfo,
    /// Current status
    pub status: MemberStatus,
    /// Incarnation number, owned by the member itself
    pub incarnation: u64,
    /// When a suspicion expires (ms), set only while `Suspect`
    pub suspect_deadline: Option<u64>,
    /// Member metadata
    pub properties: BTreeMap<String, String>,
}

impl Member {
    /// Create a new alive member.
    pub fn new(info: MemberInfo, incarnation: u64) -> Self {
        Self {
            info,
            status: MemberStatus::Alive,
            incarnation,
            suspect_deadline: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> MemberId {
        self.info.id
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            id: self.info.id,
            address: self.info.address.clone(),
            status: self.status,
            incarnation: self.incarnation,
            properties: self.properties.clone(),
        }
    }

    /// A gossip event describing this member's current state.
    pub fn to_gossip(&self, kind: GossipKind) -> GossipEvent {
        let mut event = GossipEvent::new(&self.info, kind, self.incarnation);
        if kind == GossipKind::Join {
            event.properties = self.properties.clone();
        }
        event
    }
}

/// A change in the local view, delivered to membership listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// A member was seen for the first time (or again after removal)
    MemberAdded(Member),
    /// A member was confirmed dead or left
    MemberRemoved(Member),
    /// A member toggled between Alive and Suspect
    ReachabilityChanged(Member),
    /// A member's properties changed
    MetadataChanged(Member),
}

impl MembershipChange {
    pub fn member(&self) -> &Member {
        match self {
            Self::MemberAdded(m)
            | Self::MemberRemoved(m)
            | Self::ReachabilityChanged(m)
            | Self::MetadataChanged(m) => m,
        }
    }
}

/// Outcome of applying one gossip event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event changed the local view and should be disseminated further
    Accepted,
    /// The event claimed something about us; we raised our incarnation and
    /// the caller must disseminate a fresh Join for ourselves
    Refuted,
    /// Stale or redundant, dropped silently
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    incarnation: u64,
    removed_at: u64,
}

/// Membership list tracking all known members.
pub struct MembershipList {
    /// Ourselves; never stored in `members`
    local: Member,
    /// Remote members indexed by id
    members: HashMap<MemberId, Member>,
    /// Last incarnation of removed members
    tombstones: HashMap<MemberId, Tombstone>,
    /// Changes not yet handed to listeners
    changes: Vec<MembershipChange>,
}

impl MembershipList {
    /// Create a list with the given starting incarnation for ourselves.
    ///
    /// Seed the incarnation from a clock when restarting, so the cluster
    /// does not treat our new claims as stale.
    pub fn new(local: MemberInfo, incarnation: u64) -> Self {
        Self {
            local: Member::new(local, incarnation),
            members: HashMap::new(),
            tombstones: HashMap::new(),
            changes: Vec::new(),
        }
    }

    /// The local member.
    pub fn local(&self) -> &Member {
        &self.local
    }

    pub fn local_id(&self) -> MemberId {
        self.local.info.id
    }

    pub fn local_info(&self) -> &MemberInfo {
        &self.local.info
    }

    pub fn local_incarnation(&self) -> u64 {
        self.local.incarnation
    }

    /// Increment our own incarnation (join, leave, metadata change).
    pub fn bump_local_incarnation(&mut self) -> u64 {
        self.local.incarnation = self.local.incarnation.saturating_add(1);
        self.local.incarnation
    }

    pub fn set_local_status(&mut self, status: MemberStatus) {
        self.local.status = status;
    }

    /// Set a property on ourselves. Returns false if the value is unchanged.
    ///
    /// The caller bumps the incarnation and disseminates.
    pub fn set_local_property(&mut self, key: String, value: String) -> bool {
        if self.local.properties.get(&key) == Some(&value) {
            return false;
        }
        self.local.properties.insert(key, value);
        true
    }

    /// Get a remote member by id.
    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.contains_key(id)
    }

    /// Remote members, in no particular order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Snapshot of remote members for iteration while mutating.
    pub fn members_view(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    /// Ids of all remote members.
    pub fn ids(&self) -> Vec<MemberId> {
        self.members.keys().copied().collect()
    }

    /// Full state including ourselves, as shipped in a sync response.
    pub fn snapshot(&self) -> Vec<MemberSnapshot> {
        std::iter::once(&self.local)
            .chain(self.members.values())
            .map(Member::snapshot)
            .collect()
    }

    /// Number of remote members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members including ourselves.
    pub fn cluster_size(&self) -> usize {
        self.members.len() + 1
    }

    /// Whether a member (possibly ourselves) is currently Alive.
    pub fn is_alive(&self, id: &MemberId) -> bool {
        if *id == self.local_id() {
            return self.local.is_alive();
        }
        self.members.get(id).is_some_and(Member::is_alive)
    }

    /// Take the changes recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<MembershipChange> {
        std::mem::take(&mut self.changes)
    }

    /// Record that `sender` talked to us directly at `incarnation`.
    ///
    /// Direct contact adds unknown members and clears a suspicion whose
    /// incarnation the sender has caught up with. Returns true if the view changed.
    pub fn observe(&mut self, sender: &MemberInfo, incarnation: u64) -> bool {
        if sender.id == self.local_id() {
            return false;
        }

        let Some(member) = self.members.get_mut(&sender.id) else {
            if self.is_buried(&sender.id, incarnation) {
                return false;
            }
            self.tombstones.remove(&sender.id);
            let member = Member::new(sender.clone(), incarnation);
            info!("Member added (direct contact): {} at {}", sender.id, sender.address);
            self.changes.push(MembershipChange::MemberAdded(member.clone()));
            self.members.insert(sender.id, member);
            return true;
        };

        if incarnation < member.incarnation {
            return false;
        }

        let was_suspect = member.status == MemberStatus::Suspect;
        member.incarnation = incarnation;
        member.status = MemberStatus::Alive;
        member.suspect_deadline = None;

        if was_suspect {
            info!("Member {} reachable again (direct contact)", sender.id);
            self.changes
                .push(MembershipChange::ReachabilityChanged(member.clone()));
        }
        was_suspect
    }

    /// Apply a gossip event using the SWIM merge rules.
    ///
    /// `suspect_deadline` is the expiry to record if the event starts a
    /// suspicion. `now` timestamps tombstones.
    pub fn apply(&mut self, event: &GossipEvent, suspect_deadline: u64, now: u64) -> Applied {
        if event.member == self.local_id() {
            return self.apply_about_self(event);
        }

        match event.kind {
            GossipKind::Join => self.apply_join(event),
            GossipKind::Suspect => {
                if self.suspect_member(&event.member, event.incarnation, suspect_deadline) {
                    Applied::Accepted
                } else {
                    Applied::Ignored
                }
            }
            GossipKind::Confirm | GossipKind::Leave => self.apply_removal(event, now),
        }
    }

    /// Merge a full snapshot received from a sync peer.
    ///
    /// Returns the verdict for each entry, in order.
    pub fn merge_snapshot(
        &mut self,
        snapshot: &[MemberSnapshot],
        suspect_deadline: u64,
        now: u64,
    ) -> Vec<(GossipEvent, Applied)> {
        snapshot
            .iter()
            .map(|entry| {
                let event = entry.to_gossip();
                let applied = self.apply(&event, suspect_deadline, now);
                (event, applied)
            })
            .collect()
    }

    fn apply_about_self(&mut self, event: &GossipEvent) -> Applied {
        // Nothing to refute once we are on our way out
        if event.incarnation < self.local.incarnation || !self.local.is_alive() {
            return Applied::Ignored;
        }

        let refute = match event.kind {
            // Our own join echoed back is fine; a newer one means the cluster
            // remembers a previous life of ours.
            GossipKind::Join => event.incarnation > self.local.incarnation,
            GossipKind::Suspect | GossipKind::Confirm | GossipKind::Leave => true,
        };

        if !refute {
            return Applied::Ignored;
        }

        self.local.incarnation = event.incarnation.saturating_add(1);
        info!(
            "Refuting {:?} about ourselves, incarnation now {}",
            event.kind, self.local.incarnation
        );
        Applied::Refuted
    }

    fn apply_join(&mut self, event: &GossipEvent) -> Applied {
        let Some(member) = self.members.get_mut(&event.member) else {
            if self.is_buried(&event.member, event.incarnation) {
                return Applied::Ignored;
            }
            self.tombstones.remove(&event.member);
            let mut member = Member::new(event.info(), event.incarnation);
            member.properties = event.properties.clone();
            info!("Member added: {} at {}", event.member, event.address);
            self.changes.push(MembershipChange::MemberAdded(member.clone()));
            self.members.insert(event.member, member);
            return Applied::Accepted;
        };

        if event.incarnation > member.incarnation {
            let was_suspect = member.status == MemberStatus::Suspect;
            let metadata_changed = member.properties != event.properties;

            member.info.address = event.address.clone();
            member.incarnation = event.incarnation;
            member.status = MemberStatus::Alive;
            member.suspect_deadline = None;
            member.properties = event.properties.clone();

            if was_suspect {
                info!("Member {} refuted suspicion", event.member);
                self.changes
                    .push(MembershipChange::ReachabilityChanged(member.clone()));
            }
            if metadata_changed {
                debug!("Member {} metadata changed", event.member);
                self.changes
                    .push(MembershipChange::MetadataChanged(member.clone()));
            }
            return Applied::Accepted;
        }

        // Same incarnation: adopt properties we have not seen yet (the member
        // may have been added through direct contact, which carries none).
        if event.incarnation == member.incarnation
            && member.properties.is_empty()
            && !event.properties.is_empty()
        {
            member.properties = event.properties.clone();
            self.changes
                .push(MembershipChange::MetadataChanged(member.clone()));
            return Applied::Accepted;
        }

        Applied::Ignored
    }

    fn apply_removal(&mut self, event: &GossipEvent, now: u64) -> Applied {
        match self.members.get(&event.member) {
            Some(member) if event.incarnation >= member.incarnation => {
                let status = if event.kind == GossipKind::Leave {
                    MemberStatus::Leaving
                } else {
                    MemberStatus::Dead
                };
                self.remove(&event.member, status, event.incarnation, now);
                Applied::Accepted
            }
            Some(_) => Applied::Ignored,
            None => {
                if self.is_buried(&event.member, event.incarnation) {
                    return Applied::Ignored;
                }
                // Never saw it alive, but remember the removal so a delayed
                // join at this incarnation cannot add it.
                self.tombstones.insert(
                    event.member,
                    Tombstone {
                        incarnation: event.incarnation,
                        removed_at: now,
                    },
                );
                Applied::Accepted
            }
        }
    }

    /// Mark a member as suspect.
    ///
    /// No-op (returns false) if the stored incarnation is newer, or if the
    /// member is unknown or already suspect at this incarnation.
    pub fn suspect_member(&mut self, id: &MemberId, incarnation: u64, deadline: u64) -> bool {
        let Some(member) = self.members.get_mut(id) else {
            return false;
        };

        if incarnation < member.incarnation {
            return false;
        }

        match member.status {
            MemberStatus::Alive => {
                member.status = MemberStatus::Suspect;
                member.incarnation = incarnation;
                member.suspect_deadline = Some(deadline);
                info!("Member suspected: {} (incarnation {})", id, incarnation);
                self.changes
                    .push(MembershipChange::ReachabilityChanged(member.clone()));
                true
            }
            MemberStatus::Suspect if incarnation > member.incarnation => {
                // Newer suspicion keeps the running timer
                member.incarnation = incarnation;
                true
            }
            _ => false,
        }
    }

    /// Remove a member confirmed dead. Returns the removed member.
    pub fn confirm_member(&mut self, id: &MemberId, now: u64) -> Option<Member> {
        let incarnation = self.members.get(id)?.incarnation;
        self.remove(id, MemberStatus::Dead, incarnation, now)
    }

    fn remove(
        &mut self,
        id: &MemberId,
        status: MemberStatus,
        incarnation: u64,
        now: u64,
    ) -> Option<Member> {
        let mut member = self.members.remove(id)?;
        member.status = status;
        member.incarnation = incarnation;
        member.suspect_deadline = None;

        self.tombstones.insert(
            *id,
            Tombstone {
                incarnation,
                removed_at: now,
            },
        );
        info!("Member removed: {} ({:?})", id, status);
        self.changes
            .push(MembershipChange::MemberRemoved(member.clone()));
        Some(member)
    }

    /// Suspects whose deadline has passed.
    pub fn expired_suspects(&self, now: u64) -> Vec<MemberId> {
        self.members
            .values()
            .filter(|m| m.status == MemberStatus::Suspect)
            .filter(|m| m.suspect_deadline.is_some_and(|deadline| now >= deadline))
            .map(Member::id)
            .collect()
    }

    /// Earliest suspicion deadline, if any member is suspect.
    pub fn next_suspect_deadline(&self) -> Option<u64> {
        self.members.values().filter_map(|m| m.suspect_deadline).min()
    }

    /// Forget tombstones older than `max_age` ms.
    pub fn prune_tombstones(&mut self, now: u64, max_age: u64) {
        self.tombstones
            .retain(|_, t| now.saturating_sub(t.removed_at) < max_age);
    }

    fn is_buried(&self, id: &MemberId, incarnation: u64) -> bool {
        self.tombstones
            .get(id)
            .is_some_and(|t| t.incarnation >= incarnation)
    }

    /// Forget every remote member (after leaving the cluster).
    pub fn clear(&mut self) {
        self.members.clear();
        self.tombstones.clear();
    }

    /// Pick up to `k` random alive members, excluding `exclude`.
    pub fn pick_k_random_members(&self, k: usize, exclude: &MemberId) -> Vec<MemberInfo> {
        use rand::seq::SliceRandom;

        let mut candidates: Vec<_> = self
            .members
            .values()
            .filter(|m| m.is_alive() && m.id() != *exclude)
            .map(|m| m.info.clone())
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.truncate(k);
        candidates
    }
}

/// Visits every member once per cycle, in a freshly shuffled order each cycle.
///
/// Members added mid-cycle are picked up when the next cycle starts; members
/// removed mid-cycle are skipped.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cycle: Vec<MemberId>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, list: &MembershipList) -> Option<MemberId> {
        use rand::seq::SliceRandom;

        loop {
            if self.cycle.is_empty() {
                self.cycle = list.ids();
                if self.cycle.is_empty() {
                    return None;
                }
                self.cycle.shuffle(&mut rand::rng());
            }

            let id = self.cycle.pop()?;
            if list.contains(&id) {
                return Some(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn local_id() -> MemberId {
        MemberId::from(1)
    }

    fn member_a() -> MemberId {
        MemberId::from(0xa)
    }

    fn member_b() -> MemberId {
        MemberId::from(0xb)
    }

    fn member_c() -> MemberId {
        MemberId::from(0xc)
    }

    fn info(id: MemberId) -> MemberInfo {
        MemberInfo::new(id, format!("10.0.0.{}:26502", id.as_u64()))
    }

    fn new_list() -> MembershipList {
        MembershipList::new(info(local_id()), 1)
    }

    fn join(id: MemberId, incarnation: u64) -> GossipEvent {
        GossipEvent::new(&info(id), GossipKind::Join, incarnation)
    }

    fn event(id: MemberId, kind: GossipKind, incarnation: u64) -> GossipEvent {
        GossipEvent::new(&info(id), kind, incarnation)
    }

    // ==================== Basic membership operations ====================

    #[test]
    fn test_new_membership_list() {
        let list = new_list();

        assert_eq!(list.local_id(), local_id());
        assert_eq!(list.local_incarnation(), 1);
        assert!(list.is_empty());
        assert_eq!(list.cluster_size(), 1);
        assert!(list.is_alive(&local_id()));
    }

    #[test]
    fn test_join_adds_member() {
        let mut list = new_list();

        assert_eq!(list.apply(&join(member_a(), 1), 0, 0), Applied::Accepted);

        let member = list.get(&member_a()).unwrap();
        assert_eq!(member.status, MemberStatus::Alive);
        assert_eq!(member.incarnation, 1);
        assert!(list.is_alive(&member_a()));
        assert_eq!(list.cluster_size(), 2);

        let changes = list.drain_changes();
        assert!(matches!(&changes[..], [MembershipChange::MemberAdded(m)] if m.id() == member_a()));
    }

    #[test]
    fn test_join_same_incarnation_ignored() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);

        assert_eq!(list.apply(&join(member_a(), 1), 0, 0), Applied::Ignored);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_join_higher_incarnation_updates_address() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);

        let mut newer = join(member_a(), 2);
        newer.address = "10.0.0.99:26502".to_string();
        assert_eq!(list.apply(&newer, 0, 0), Applied::Accepted);

        let member = list.get(&member_a()).unwrap();
        assert_eq!(member.incarnation, 2);
        assert_eq!(member.info.address, "10.0.0.99:26502");
    }

    #[test]
    fn test_join_lower_incarnation_ignored() {
        let mut list = new_list();
        list.apply(&join(member_a(), 5), 0, 0);

        assert_eq!(list.apply(&join(member_a(), 3), 0, 0), Applied::Ignored);
        assert_eq!(list.get(&member_a()).unwrap().incarnation, 5);
    }

    #[test]
    fn test_join_about_self_echo_ignored() {
        let mut list = new_list();

        assert_eq!(list.apply(&join(local_id(), 1), 0, 0), Applied::Ignored);
        assert!(list.is_empty());
        assert_eq!(list.local_incarnation(), 1);
    }

    #[test]
    fn test_join_about_previous_life_refuted() {
        let mut list = new_list();

        assert_eq!(list.apply(&join(local_id(), 7), 0, 0), Applied::Refuted);
        assert_eq!(list.local_incarnation(), 8);
    }

    // ==================== Suspicion ====================

    #[test]
    fn test_suspect_member() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.drain_changes();

        assert!(list.suspect_member(&member_a(), 1, 5000));

        let member = list.get(&member_a()).unwrap();
        assert_eq!(member.status, MemberStatus::Suspect);
        assert_eq!(member.suspect_deadline, Some(5000));
        assert!(!list.is_alive(&member_a()));
        assert!(matches!(
            &list.drain_changes()[..],
            [MembershipChange::ReachabilityChanged(m)] if m.status == MemberStatus::Suspect
        ));
    }

    #[test]
    fn test_suspect_with_old_incarnation_ignored() {
        let mut list = new_list();
        list.apply(&join(member_a(), 5), 0, 0);

        assert!(!list.suspect_member(&member_a(), 3, 5000));
        assert_eq!(list.get(&member_a()).unwrap().status, MemberStatus::Alive);
    }

    #[test]
    fn test_suspect_already_suspect_is_noop() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);

        assert!(list.suspect_member(&member_a(), 1, 5000));
        assert!(!list.suspect_member(&member_a(), 1, 9000));
        assert_eq!(list.get(&member_a()).unwrap().suspect_deadline, Some(5000));
    }

    #[test]
    fn test_suspect_unknown_member_ignored() {
        let mut list = new_list();
        assert!(!list.suspect_member(&member_a(), 1, 5000));
        assert_eq!(
            list.apply(&event(member_a(), GossipKind::Suspect, 1), 5000, 0),
            Applied::Ignored
        );
    }

    #[test]
    fn test_suspect_gossip_about_self_refuted() {
        let mut list = new_list();

        let applied = list.apply(&event(local_id(), GossipKind::Suspect, 5), 0, 0);

        assert_eq!(applied, Applied::Refuted);
        assert_eq!(list.local_incarnation(), 6);
        assert!(list.is_alive(&local_id()));
    }

    #[test]
    fn test_stale_suspect_about_self_ignored() {
        let mut list = MembershipList::new(info(local_id()), 10);

        let applied = list.apply(&event(local_id(), GossipKind::Suspect, 4), 0, 0);

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(list.local_incarnation(), 10);
    }

    #[test]
    fn test_gossip_alive_same_incarnation_does_not_clear_suspicion() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.suspect_member(&member_a(), 1, 5000);

        assert_eq!(list.apply(&join(member_a(), 1), 0, 0), Applied::Ignored);
        assert_eq!(list.get(&member_a()).unwrap().status, MemberStatus::Suspect);
    }

    #[test]
    fn test_gossip_alive_higher_incarnation_refutes_suspicion() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.suspect_member(&member_a(), 1, 5000);
        list.drain_changes();

        assert_eq!(list.apply(&join(member_a(), 2), 0, 0), Applied::Accepted);

        let member = list.get(&member_a()).unwrap();
        assert_eq!(member.status, MemberStatus::Alive);
        assert_eq!(member.incarnation, 2);
        assert_eq!(member.suspect_deadline, None);
        assert!(matches!(
            &list.drain_changes()[..],
            [MembershipChange::ReachabilityChanged(m)] if m.is_alive()
        ));
    }

    #[test]
    fn test_direct_contact_refutes_suspicion() {
        let mut list = new_list();
        list.apply(&join(member_a(), 3), 0, 0);
        list.suspect_member(&member_a(), 3, 5000);

        assert!(list.observe(&info(member_a()), 3));
        assert!(list.is_alive(&member_a()));
    }

    #[test]
    fn test_direct_contact_with_stale_incarnation_keeps_suspicion() {
        let mut list = new_list();
        list.apply(&join(member_a(), 3), 0, 0);
        list.suspect_member(&member_a(), 3, 5000);

        assert!(!list.observe(&info(member_a()), 2));
        assert!(!list.is_alive(&member_a()));
    }

    #[test]
    fn test_direct_contact_adds_unknown_member() {
        let mut list = new_list();

        assert!(list.observe(&info(member_b()), 4));
        assert_eq!(list.get(&member_b()).unwrap().incarnation, 4);
        assert!(!list.observe(&info(local_id()), 9));
    }

    // ==================== Removal ====================

    #[test]
    fn test_confirm_member_removes_and_reports() {
        let mut list = new_list();
        list.apply(&join(member_a(), 2), 0, 0);
        list.suspect_member(&member_a(), 2, 5000);
        list.drain_changes();

        let removed = list.confirm_member(&member_a(), 6000).unwrap();

        assert_eq!(removed.status, MemberStatus::Dead);
        assert_eq!(removed.incarnation, 2);
        assert!(!list.contains(&member_a()));
        assert!(matches!(&list.drain_changes()[..], [MembershipChange::MemberRemoved(_)]));
    }

    #[test]
    fn test_confirm_gossip_removes_member() {
        let mut list = new_list();
        list.apply(&join(member_a(), 2), 0, 0);

        let applied = list.apply(&event(member_a(), GossipKind::Confirm, 2), 0, 100);

        assert_eq!(applied, Applied::Accepted);
        assert!(!list.contains(&member_a()));
    }

    #[test]
    fn test_stale_confirm_ignored() {
        let mut list = new_list();
        list.apply(&join(member_a(), 4), 0, 0);

        let applied = list.apply(&event(member_a(), GossipKind::Confirm, 3), 0, 100);

        assert_eq!(applied, Applied::Ignored);
        assert!(list.contains(&member_a()));
    }

    #[test]
    fn test_leave_gossip_removes_member_as_leaving() {
        let mut list = new_list();
        list.apply(&join(member_a(), 2), 0, 0);
        list.drain_changes();

        list.apply(&event(member_a(), GossipKind::Leave, 3), 0, 100);

        assert!(!list.contains(&member_a()));
        assert!(matches!(
            &list.drain_changes()[..],
            [MembershipChange::MemberRemoved(m)] if m.status == MemberStatus::Leaving
        ));
    }

    #[test]
    fn test_tombstone_blocks_stale_join() {
        let mut list = new_list();
        list.apply(&join(member_a(), 2), 0, 0);
        list.confirm_member(&member_a(), 100);

        // Join still circulating from before the removal
        assert_eq!(list.apply(&join(member_a(), 2), 0, 200), Applied::Ignored);
        assert!(!list.observe(&info(member_a()), 2));
        assert!(!list.contains(&member_a()));

        // The member itself rejoined with a newer incarnation
        assert_eq!(list.apply(&join(member_a(), 3), 0, 300), Applied::Accepted);
        assert!(list.is_alive(&member_a()));
    }

    #[test]
    fn test_confirm_for_unknown_member_leaves_tombstone() {
        let mut list = new_list();

        assert_eq!(
            list.apply(&event(member_a(), GossipKind::Confirm, 5), 0, 0),
            Applied::Accepted
        );
        assert_eq!(
            list.apply(&event(member_a(), GossipKind::Confirm, 5), 0, 0),
            Applied::Ignored
        );
        assert_eq!(list.apply(&join(member_a(), 5), 0, 0), Applied::Ignored);
    }

    #[test]
    fn test_prune_tombstones() {
        let mut list = new_list();
        list.apply(&join(member_a(), 2), 0, 0);
        list.confirm_member(&member_a(), 1000);

        list.prune_tombstones(1500, 1000);
        assert_eq!(list.apply(&join(member_a(), 2), 0, 1500), Applied::Ignored);

        list.prune_tombstones(2000, 1000);
        assert_eq!(list.apply(&join(member_a(), 2), 0, 2000), Applied::Accepted);
    }

    #[test]
    fn test_leave_echo_about_self_while_leaving_ignored() {
        let mut list = new_list();
        let incarnation = list.bump_local_incarnation();
        list.set_local_status(MemberStatus::Leaving);

        let applied = list.apply(&event(local_id(), GossipKind::Leave, incarnation), 0, 0);

        assert_eq!(applied, Applied::Ignored);
        assert!(!list.is_alive(&local_id()));
    }

    #[test]
    fn test_expired_suspects() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.apply(&join(member_b(), 1), 0, 0);
        list.apply(&join(member_c(), 1), 0, 0);
        list.suspect_member(&member_a(), 1, 1000);
        list.suspect_member(&member_b(), 1, 3000);

        assert_eq!(list.next_suspect_deadline(), Some(1000));
        assert!(list.expired_suspects(999).is_empty());
        assert_eq!(list.expired_suspects(1000), vec![member_a()]);
        assert_eq!(list.expired_suspects(3000).len(), 2);
    }

    // ==================== Metadata ====================

    #[test]
    fn test_join_with_new_properties_reports_metadata_change() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.drain_changes();

        let mut update = join(member_a(), 2);
        update
            .properties
            .insert("partitions".to_string(), "1,2".to_string());
        list.apply(&update, 0, 0);

        assert_eq!(
            list.get(&member_a()).unwrap().properties.get("partitions"),
            Some(&"1,2".to_string())
        );
        assert!(matches!(
            &list.drain_changes()[..],
            [MembershipChange::MetadataChanged(_)]
        ));
    }

    #[test]
    fn test_same_incarnation_adopts_properties_when_missing() {
        let mut list = new_list();
        list.observe(&info(member_a()), 1);

        let mut gossip = join(member_a(), 1);
        gossip.properties.insert("role".to_string(), "broker".to_string());

        assert_eq!(list.apply(&gossip, 0, 0), Applied::Accepted);
        assert_eq!(
            list.get(&member_a()).unwrap().properties.get("role"),
            Some(&"broker".to_string())
        );

        // Once known, same-incarnation properties are not overwritten
        let mut other = join(member_a(), 1);
        other.properties.insert("role".to_string(), "gateway".to_string());
        assert_eq!(list.apply(&other, 0, 0), Applied::Ignored);
    }

    #[test]
    fn test_set_local_property() {
        let mut list = new_list();

        assert!(list.set_local_property("zone".into(), "eu".into()));
        assert!(!list.set_local_property("zone".into(), "eu".into()));
        assert_eq!(
            list.local().to_gossip(GossipKind::Join).properties.get("zone"),
            Some(&"eu".to_string())
        );
    }

    // ==================== Snapshots ====================

    #[test]
    fn test_snapshot_includes_self() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);

        let snapshot = list.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|s| s.id == local_id()));
    }

    #[test]
    fn test_merge_snapshot_converges_views() {
        let mut a = MembershipList::new(info(member_a()), 1);
        let mut b = MembershipList::new(info(member_b()), 1);
        a.apply(&join(member_c(), 2), 0, 0);
        b.apply(&join(local_id(), 1), 0, 0);

        a.merge_snapshot(&b.snapshot(), 0, 0);
        b.merge_snapshot(&a.snapshot(), 0, 0);

        let mut view_a: Vec<_> = a.ids();
        view_a.push(a.local_id());
        let mut view_b: Vec<_> = b.ids();
        view_b.push(b.local_id());
        view_a.sort();
        view_b.sort();
        assert_eq!(view_a, view_b);
    }

    #[test]
    fn test_merge_snapshot_refutes_suspicion_of_self() {
        let mut list = new_list();
        let snapshot = vec![MemberSnapshot {
            id: local_id(),
            address: info(local_id()).address,
            status: MemberStatus::Suspect,
            incarnation: 1,
            properties: BTreeMap::new(),
        }];

        let verdicts = list.merge_snapshot(&snapshot, 0, 0);

        assert_eq!(verdicts[0].1, Applied::Refuted);
        assert_eq!(list.local_incarnation(), 2);
    }

    // ==================== Random selection ====================

    #[test]
    fn test_pick_k_random_members_excludes_target_and_suspects() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.apply(&join(member_b(), 1), 0, 0);
        list.apply(&join(member_c(), 1), 0, 0);
        list.suspect_member(&member_c(), 1, 1000);

        let picked = list.pick_k_random_members(3, &member_a());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, member_b());
    }

    #[test]
    fn test_pick_k_random_fewer_than_k() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);

        assert_eq!(list.pick_k_random_members(3, &member_b()).len(), 1);
        assert!(list.pick_k_random_members(0, &member_b()).is_empty());
    }

    // ==================== Round robin ====================

    #[test]
    fn test_round_robin_empty() {
        let list = new_list();
        assert!(RoundRobin::new().next(&list).is_none());
    }

    #[test]
    fn test_round_robin_visits_each_member_once_per_cycle() {
        let mut list = new_list();
        for id in 10..20u64 {
            list.apply(&join(MemberId::from(id), 1), 0, 0);
        }

        let mut iter = RoundRobin::new();
        for _ in 0..3 {
            let cycle: Vec<_> = (0..10).map(|_| iter.next(&list).unwrap()).collect();
            let unique: HashSet<_> = cycle.iter().collect();
            assert_eq!(unique.len(), 10, "a member repeated within one cycle");
        }
    }

    #[test]
    fn test_round_robin_skips_removed_members() {
        let mut list = new_list();
        list.apply(&join(member_a(), 1), 0, 0);
        list.apply(&join(member_b(), 1), 0, 0);

        let mut iter = RoundRobin::new();
        let first = iter.next(&list).unwrap();
        let other = if first == member_a() { member_b() } else { member_a() };
        list.confirm_member(&other, 0);

        // The rest of the cycle only held the removed member
        assert_eq!(iter.next(&list), Some(first));
    }
}
