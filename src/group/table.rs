//! Group membership table owned by the coordinator

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::handler::DeviceSender;
use crate::message::{DeviceId, ErrorKind, GroupId, GroupReport, GroupSnapshot};

#[derive(Debug)]
struct GroupEntry {
    term: u64,
    /// Leader as last reported; may name a device without a handler
    leader: Option<DeviceId>,
    confirmed: BTreeSet<DeviceId>,
}

#[derive(Debug)]
struct DeviceEntry {
    sender: DeviceSender,
    /// Bookkeeping back-reference, never used for addressing
    group: Option<GroupId>,
}

/// Summary of one group, as exposed to the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub group: GroupId,
    pub term: u64,
    pub leader: Option<DeviceId>,
    pub confirmed: Vec<DeviceId>,
}

/// Groups and the device handles they are made of
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: HashMap<GroupId, GroupEntry>,
    devices: HashMap<DeviceId, DeviceEntry>,
}

impl GroupTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a device handle, keeping its group membership
    pub fn add_device(&mut self, device: DeviceId, sender: DeviceSender) {
        match self.devices.get_mut(&device) {
            Some(entry) => entry.sender = sender,
            None => {
                self.devices.insert(device, DeviceEntry { sender, group: None });
            }
        }
    }

    /// Forget a disconnected device
    ///
    /// Returns the group that became empty and was deleted, if any.
    pub fn remove_device(&mut self, device: &DeviceId) -> Option<GroupId> {
        let entry = self.devices.remove(device)?;
        entry.group.and_then(|group| self.leave(group, device))
    }

    #[must_use]
    pub fn sender(&self, device: &DeviceId) -> Option<&DeviceSender> {
        self.devices.get(device).map(|entry| &entry.sender)
    }

    #[must_use]
    pub fn contains_device(&self, device: &DeviceId) -> bool {
        self.devices.contains_key(device)
    }

    #[must_use]
    pub fn contains_group(&self, group: GroupId) -> bool {
        self.groups.contains_key(&group)
    }

    /// Group a device currently belongs to
    #[must_use]
    pub fn group_of(&self, device: &DeviceId) -> Option<GroupId> {
        self.devices.get(device).and_then(|entry| entry.group)
    }

    /// Apply a membership report from `reporter`
    ///
    /// Reports older than the stored term are ignored and yield `None`.
    pub fn apply_report(&mut self, reporter: &DeviceId, report: &GroupReport) -> Option<GroupSnapshot> {
        let previous = self.devices.get(reporter)?.group;

        let Some(group) = report.group else {
            if let Some(old) = previous {
                self.leave(old, reporter);
            }
            if let Some(entry) = self.devices.get_mut(reporter) {
                entry.group = None;
            }
            return Some(GroupSnapshot {
                reporter: reporter.clone(),
                group: None,
                term: report.term,
                leader: None,
                members: Vec::new(),
                unknown_members: Vec::new(),
            });
        };

        if let Some(stored) = self.groups.get(&group)
            && report.term < stored.term
        {
            tracing::debug!(
                %group,
                reporter = %reporter,
                stored = stored.term,
                reported = report.term,
                "stale group report ignored"
            );
            return None;
        }

        if let Some(old) = previous
            && old != group
        {
            self.leave(old, reporter);
        }

        let entry = self.groups.entry(group).or_insert_with(|| GroupEntry {
            term: report.term,
            leader: None,
            confirmed: BTreeSet::new(),
        });
        entry.term = report.term;
        entry.leader.clone_from(&report.leader);
        entry.confirmed.insert(reporter.clone());

        if let Some(device) = self.devices.get_mut(reporter) {
            device.group = Some(group);
        }

        let (members, unknown_members): (Vec<_>, Vec<_>) = report
            .members
            .iter()
            .cloned()
            .partition(|member| self.devices.contains_key(member));

        Some(GroupSnapshot {
            reporter: reporter.clone(),
            group: Some(group),
            term: report.term,
            leader: report.leader.clone().filter(|leader| self.devices.contains_key(leader)),
            members,
            unknown_members,
        })
    }

    /// Resolve the current leader of a group
    ///
    /// # Errors
    ///
    /// Returns the group error describing why no leader handle is available.
    pub fn leader(&self, group: Option<GroupId>) -> Result<(&DeviceId, &DeviceSender), ErrorKind> {
        let group = group.ok_or(ErrorKind::GroupNotSet)?;
        let entry = self.groups.get(&group).ok_or(ErrorKind::GroupUnknown)?;
        let leader = entry.leader.as_ref().ok_or(ErrorKind::GroupWithoutLeader)?;
        let handle = self.devices.get(leader).ok_or(ErrorKind::GroupLeaderUnknown)?;
        Ok((leader, &handle.sender))
    }

    /// Devices whose back-reference names `group`
    #[must_use]
    pub fn members_of(&self, group: GroupId) -> Vec<(DeviceId, DeviceSender)> {
        let mut members: Vec<_> = self
            .devices
            .iter()
            .filter(|(_, entry)| entry.group == Some(group))
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    /// Drop every group whose confirmed set is empty
    ///
    /// Backstop only: `remove_device` and `apply_report` already delete a
    /// group the moment its last confirmed member leaves, so this normally
    /// finds nothing.
    pub fn sweep(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, entry| !entry.confirmed.is_empty());
        before - self.groups.len()
    }

    #[must_use]
    pub fn info(&self, group: GroupId) -> Option<GroupInfo> {
        self.groups.get(&group).map(|entry| GroupInfo {
            group,
            term: entry.term,
            leader: entry.leader.clone(),
            confirmed: entry.confirmed.iter().cloned().collect(),
        })
    }

    /// Summaries of every group, ordered by id
    #[must_use]
    pub fn infos(&self) -> Vec<GroupInfo> {
        let mut ids: Vec<_> = self.groups.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|group| self.info(group)).collect()
    }

    fn leave(&mut self, group: GroupId, device: &DeviceId) -> Option<GroupId> {
        let entry = self.groups.get_mut(&group)?;
        entry.confirmed.remove(device);
        if entry.confirmed.is_empty() {
            self.groups.remove(&group);
            tracing::debug!(%group, "group emptied and removed");
            return Some(group);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const G1: GroupId = GroupId::new(1);

    fn table(devices: &[&str]) -> GroupTable {
        let mut table = GroupTable::new();
        for id in devices {
            let (tx, _rx) = mpsc::unbounded_channel();
            table.add_device(DeviceId::new(*id), tx);
        }
        table
    }

    fn report(term: u64, leader: &str) -> GroupReport {
        GroupReport {
            group: Some(G1),
            term,
            leader: Some(DeviceId::new(leader)),
            members: vec![DeviceId::new("d1"), DeviceId::new("d2")],
        }
    }

    #[test]
    fn report_creates_group_with_leader() {
        let mut table = table(&["d1", "d2"]);
        let snapshot = table.apply_report(&DeviceId::new("d1"), &report(1, "d1")).unwrap();

        assert_eq!(snapshot.leader, Some(DeviceId::new("d1")));
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(table.leader(Some(G1)).unwrap().0, &DeviceId::new("d1"));
        assert_eq!(table.group_of(&DeviceId::new("d1")), Some(G1));
    }

    #[test]
    fn stale_term_is_ignored() {
        let mut table = table(&["d1", "d2"]);
        table.apply_report(&DeviceId::new("d1"), &report(1, "d1"));

        assert!(table.apply_report(&DeviceId::new("d2"), &report(0, "d2")).is_none());

        let info = table.info(G1).unwrap();
        assert_eq!(info.term, 1);
        assert_eq!(info.leader, Some(DeviceId::new("d1")));
        assert_eq!(info.confirmed, vec![DeviceId::new("d1")]);
        assert_eq!(table.group_of(&DeviceId::new("d2")), None);
    }

    #[test]
    fn equal_term_is_accepted() {
        let mut table = table(&["d1", "d2"]);
        table.apply_report(&DeviceId::new("d1"), &report(2, "d1"));
        table.apply_report(&DeviceId::new("d2"), &report(2, "d2"));

        assert_eq!(table.info(G1).unwrap().leader, Some(DeviceId::new("d2")));
    }

    #[test]
    fn leader_errors() {
        let mut table = table(&["d1"]);
        assert_eq!(table.leader(None).unwrap_err(), ErrorKind::GroupNotSet);
        assert_eq!(table.leader(Some(G1)).unwrap_err(), ErrorKind::GroupUnknown);

        let mut leaderless = report(1, "d1");
        leaderless.leader = None;
        table.apply_report(&DeviceId::new("d1"), &leaderless);
        assert_eq!(table.leader(Some(G1)).unwrap_err(), ErrorKind::GroupWithoutLeader);

        table.apply_report(&DeviceId::new("d1"), &report(2, "ghost"));
        assert_eq!(table.leader(Some(G1)).unwrap_err(), ErrorKind::GroupLeaderUnknown);
    }

    #[test]
    fn unknown_members_are_reported_separately() {
        let mut table = table(&["d1"]);
        let snapshot = table.apply_report(&DeviceId::new("d1"), &report(1, "d1")).unwrap();

        assert_eq!(snapshot.members, vec![DeviceId::new("d1")]);
        assert_eq!(snapshot.unknown_members, vec![DeviceId::new("d2")]);
    }

    #[test]
    fn last_member_leaving_removes_group() {
        let mut table = table(&["d1", "d2"]);
        table.apply_report(&DeviceId::new("d1"), &report(1, "d1"));
        table.apply_report(&DeviceId::new("d2"), &report(1, "d1"));

        assert_eq!(table.remove_device(&DeviceId::new("d1")), None);
        assert_eq!(table.leader(Some(G1)).unwrap_err(), ErrorKind::GroupLeaderUnknown);
        assert_eq!(table.remove_device(&DeviceId::new("d2")), Some(G1));
        assert_eq!(table.leader(Some(G1)).unwrap_err(), ErrorKind::GroupUnknown);
    }

    #[test]
    fn switching_groups_moves_back_reference() {
        let mut table = table(&["d1"]);
        table.apply_report(&DeviceId::new("d1"), &report(1, "d1"));

        let other = GroupReport {
            group: Some(GroupId::new(2)),
            term: 1,
            leader: None,
            members: Vec::new(),
        };
        table.apply_report(&DeviceId::new("d1"), &other);

        assert!(!table.contains_group(G1));
        assert_eq!(table.group_of(&DeviceId::new("d1")), Some(GroupId::new(2)));
        assert_eq!(table.members_of(GroupId::new(2)).len(), 1);
    }

    #[test]
    fn no_group_report_clears_membership() {
        let mut table = table(&["d1", "d2"]);
        table.apply_report(&DeviceId::new("d1"), &report(1, "d1"));
        table.apply_report(&DeviceId::new("d2"), &report(1, "d1"));

        let snapshot = table.apply_report(&DeviceId::new("d2"), &GroupReport::none()).unwrap();
        assert_eq!(snapshot.group, None);
        assert_eq!(table.group_of(&DeviceId::new("d2")), None);
        assert_eq!(table.info(G1).unwrap().confirmed, vec![DeviceId::new("d1")]);
    }

    #[test]
    fn reports_from_unregistered_devices_are_ignored() {
        let mut table = table(&[]);
        assert!(table.apply_report(&DeviceId::new("d9"), &report(1, "d9")).is_none());
        assert!(table.infos().is_empty());
    }

    #[test]
    fn sweep_keeps_confirmed_groups() {
        let mut table = table(&["d1"]);
        assert_eq!(table.sweep(), 0);
        table.apply_report(&DeviceId::new("d1"), &report(1, "d1"));
        assert_eq!(table.sweep(), 0);
        assert_eq!(table.infos().len(), 1);

        // Emptied groups are gone before any sweep runs
        table.remove_device(&DeviceId::new("d1"));
        assert!(table.infos().is_empty());
        assert_eq!(table.sweep(), 0);
    }
}
