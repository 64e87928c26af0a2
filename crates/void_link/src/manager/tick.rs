//! Per-frame queue processing.

use std::time::{Duration, Instant};

use super::queue::{LinkQueue, PendingLink};
use super::LinkManager;
use crate::id::{LinkableId, PartitionId};

/// What a single tick accomplished
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Forward links materialized from the outstanding queue
    pub links_resolved: usize,
    /// Back links resolved from the outstanding queue
    pub back_links_resolved: usize,
    /// Entries moved behind a boundary placeholder
    pub placeholders_created: usize,
    /// Boundary entries whose far side became resident
    pub placeholders_resolved: usize,
    /// Entries dropped because their anchor object is gone
    pub discarded: usize,
    /// Wall time spent
    pub elapsed: Duration,
    /// The budget ran out with work left
    pub budget_exhausted: bool,
}

impl TickStats {
    pub fn processed(&self) -> usize {
        self.links_resolved
            + self.back_links_resolved
            + self.placeholders_created
            + self.placeholders_resolved
            + self.discarded
    }
}

struct Budget {
    start: Instant,
    limit: Duration,
    exhausted: bool,
}

impl Budget {
    fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
            exhausted: false,
        }
    }

    /// Check if there is time for one more entry
    fn allows(&mut self) -> bool {
        if self.start.elapsed() < self.limit {
            true
        } else {
            self.exhausted = true;
            false
        }
    }
}

/// Check if any boundary entry still needs the placeholder of `source`
/// toward `partition`.
fn placeholder_needed(
    source: LinkableId,
    partition: &PartitionId,
    links: &LinkQueue,
    back_links: &LinkQueue,
) -> bool {
    links
        .iter()
        .any(|e| e.from == source && &e.to_partition == partition)
        || back_links
            .iter()
            .any(|e| e.to == source && &e.from_partition == partition)
}

impl LinkManager {
    /// Drain the work queues for at most the configured budget.
    ///
    /// Entries are handled in queue order; whatever is left when the
    /// budget runs out waits for the next call.
    pub fn tick(&self) -> TickStats {
        let mut budget = Budget::new(self.config.tick_budget());
        let mut stats = TickStats::default();

        self.process_outstanding_links(&mut budget, &mut stats);
        self.process_outstanding_back_links(&mut budget, &mut stats);
        self.process_boundary_links(&mut budget, &mut stats);

        stats.elapsed = budget.start.elapsed();
        stats.budget_exhausted = budget.exhausted;
        if stats.processed() > 0 || stats.budget_exhausted {
            let counts = self.queue_counts();
            log::trace!(
                "Link tick: {} processed in {:?}, queues {}/{}/{}/{}",
                stats.processed(),
                stats.elapsed,
                counts.outstanding_links,
                counts.outstanding_back_links,
                counts.boundary_links,
                counts.boundary_back_links,
            );
        }
        stats
    }

    /// Forward links: materialize once the target is resident, otherwise
    /// show a placeholder toward the target's partition.
    fn process_outstanding_links(&self, budget: &mut Budget, stats: &mut TickStats) {
        let mut outstanding = self.outstanding_links.lock();
        let mut boundary = self.boundary_links.lock();

        let mut i = 0;
        while i < outstanding.len() && budget.allows() {
            let Some(entry) = outstanding.get(i).cloned() else {
                break;
            };

            let Some(from) = self.get_registered(entry.from) else {
                log::warn!("Dropping pending link from unregistered object {}", entry.from);
                outstanding.remove(i);
                stats.discarded += 1;
                continue;
            };

            if let Some(to) = self.get_registered(entry.to) {
                outstanding.remove(i);
                self.update_link(&from, &to);
                stats.links_resolved += 1;
            } else if entry.is_same_partition() {
                // Another load unit of the same partition is still streaming
                i += 1;
            } else {
                outstanding.remove(i);
                let partition = entry.to_partition.clone();
                if boundary.push_unique(entry) {
                    from.create_boundary(partition);
                    stats.placeholders_created += 1;
                }
            }
        }
    }

    /// Back links: validate once the referrer is resident, otherwise show a
    /// placeholder on the target toward the referrer's partition.
    fn process_outstanding_back_links(&self, budget: &mut Budget, stats: &mut TickStats) {
        let mut outstanding = self.outstanding_back_links.lock();
        let mut boundary = self.boundary_back_links.lock();

        let mut i = 0;
        while i < outstanding.len() && budget.allows() {
            let Some(entry) = outstanding.get(i).cloned() else {
                break;
            };

            let Some(to) = self.get_registered(entry.to) else {
                log::warn!("Dropping pending back link of unregistered object {}", entry.to);
                outstanding.remove(i);
                stats.discarded += 1;
                continue;
            };

            if let Some(from) = self.get_registered(entry.from) {
                outstanding.remove(i);
                if self.config.validate_back_links {
                    self.update_link(&to, &from);
                }
                stats.back_links_resolved += 1;
            } else if entry.is_same_partition() {
                i += 1;
            } else {
                outstanding.remove(i);
                let partition = entry.from_partition.clone();
                if boundary.push_unique(entry) {
                    to.create_boundary(partition);
                    stats.placeholders_created += 1;
                }
            }
        }
    }

    /// Boundary entries in both directions: once the far side is resident,
    /// retire the placeholder and materialize the link.
    fn process_boundary_links(&self, budget: &mut Budget, stats: &mut TickStats) {
        let mut links = self.boundary_links.lock();
        let mut back_links = self.boundary_back_links.lock();

        let mut i = 0;
        while i < links.len() && budget.allows() {
            let Some(entry) = links.get(i).cloned() else {
                break;
            };
            let Some(from) = self.get_registered(entry.from) else {
                links.remove(i);
                stats.discarded += 1;
                continue;
            };
            let Some(to) = self.get_registered(entry.to) else {
                i += 1;
                continue;
            };

            links.remove(i);
            if !placeholder_needed(entry.from, &entry.to_partition, &links, &back_links) {
                from.remove_boundary(&entry.to_partition);
            }
            self.update_link(&from, &to);
            stats.placeholders_resolved += 1;
        }

        let mut i = 0;
        while i < back_links.len() && budget.allows() {
            let Some(entry) = back_links.get(i).cloned() else {
                break;
            };
            let Some(to) = self.get_registered(entry.to) else {
                back_links.remove(i);
                stats.discarded += 1;
                continue;
            };
            let Some(from) = self.get_registered(entry.from) else {
                i += 1;
                continue;
            };

            back_links.remove(i);
            if !placeholder_needed(entry.to, &entry.from_partition, &links, &back_links) {
                to.remove_boundary(&entry.from_partition);
            }
            self.update_link(&to, &from);
            stats.placeholders_resolved += 1;
        }
    }

    /// Retire placeholders for entries removed from the boundary queues
    pub(crate) fn retire_placeholders(&self, removed: &[PendingLink]) {
        if removed.is_empty() {
            return;
        }
        let links = self.boundary_links.lock();
        let back_links = self.boundary_back_links.lock();
        for entry in removed {
            for (anchor, partition) in [
                (entry.from, &entry.to_partition),
                (entry.to, &entry.from_partition),
            ] {
                if placeholder_needed(anchor, partition, &links, &back_links) {
                    continue;
                }
                if let Some(linkable) = self.get_registered(anchor) {
                    linkable.remove_boundary(partition);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::LinkManagerConfig;
    use crate::link::LinkDirection;
    use crate::manager::{LinkManager, QueueKind};
    use crate::testing::{
        drain, id, link, manager_with, partition, PropertyValue, TestItem, TestLoader,
    };
    use crate::undo::NullUndo;

    #[test]
    fn test_round_trip_through_placeholder() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let a = TestItem::data_object(
            id(1),
            "cell_a",
            vec![PropertyValue::Link(link(2, "cell_b"))],
        );
        let b = TestItem::data_object(id(2), "cell_b", vec![]);

        a.linkable().attach(&manager).unwrap();
        let stats = manager.tick();
        assert_eq!(stats.placeholders_created, 1);
        assert_eq!(a.linkable().boundaries(), vec![partition("cell_b")]);
        assert_eq!(a.attached_boundaries(), 1);
        assert_eq!(manager.queue_counts().boundary_links, 1);

        b.linkable().attach(&manager).unwrap();
        drain(&manager, 10);
        assert!(manager.is_idle());
        assert!(a.linkable().boundaries().is_empty());
        assert_eq!(a.attached_boundaries(), 0);

        let rendered = a.linkable().link_to(b.linkable()).unwrap();
        assert_eq!(rendered.direction_from(a.linkable()), LinkDirection::StartToEnd);
        assert!(b.linkable().has_back_link(id(1)));
    }

    #[test]
    fn test_back_link_placeholder_on_target() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let a = TestItem::data_object(
            id(1),
            "cell_a",
            vec![PropertyValue::Link(link(2, "cell_b"))],
        );
        let b = TestItem::data_object(id(2), "cell_b", vec![]);
        b.linkable().add_back_link(id(1), partition("cell_a"));

        b.linkable().attach(&manager).unwrap();
        manager.tick();
        assert_eq!(b.linkable().boundaries(), vec![partition("cell_a")]);
        assert_eq!(manager.queue_counts().boundary_back_links, 1);

        a.linkable().attach(&manager).unwrap();
        drain(&manager, 10);
        assert!(manager.is_idle());
        assert!(b.linkable().boundaries().is_empty());
        assert!(a.linkable().link_to(b.linkable()).is_some());
    }

    #[test]
    fn test_same_partition_stays_pending() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Link(link(2, "cell"))]);
        a.place_in_shell("shell_1", "cell");

        a.linkable().attach(&manager).unwrap();
        manager.tick();
        manager.tick();
        assert_eq!(manager.queue_counts().outstanding_links, 1);
        assert!(a.linkable().boundaries().is_empty());

        let b = TestItem::data_object(id(2), "cell", vec![]);
        b.place_in_shell("shell_2", "cell");
        b.linkable().attach(&manager).unwrap();
        drain(&manager, 10);
        assert!(manager.is_idle());
        assert!(a.linkable().is_linked_to(id(2)));
    }

    #[test]
    fn test_shared_placeholder_survives_until_last_entry() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let a = TestItem::data_object(
            id(1),
            "cell_a",
            vec![PropertyValue::Array(vec![link(2, "cell_b"), link(3, "cell_b")])],
        );
        let b = TestItem::data_object(id(2), "cell_b", vec![]);

        a.linkable().attach(&manager).unwrap();
        manager.tick();
        assert_eq!(a.attached_boundaries(), 1);
        assert_eq!(manager.queue_counts().boundary_links, 2);

        b.linkable().attach(&manager).unwrap();
        manager.tick();
        assert_eq!(manager.queue_counts().boundary_links, 1);
        assert_eq!(a.linkable().boundaries(), vec![partition("cell_b")]);
        assert!(a.linkable().is_linked_to(id(2)));
    }

    #[test]
    fn test_budget_carries_work_over() {
        let loader = TestLoader::new();
        let config = LinkManagerConfig::default().with_budget(Duration::ZERO);
        let manager = LinkManager::new(config, loader.clone(), Arc::new(NullUndo));
        let a = TestItem::data_object(
            id(1),
            "cell_a",
            vec![PropertyValue::Link(link(2, "cell_b"))],
        );
        a.linkable().attach(&manager).unwrap();

        let stats = manager.tick();
        assert!(stats.budget_exhausted);
        assert_eq!(stats.processed(), 0);
        assert_eq!(manager.pending(QueueKind::OutstandingLinks).len(), 1);

        let (patient, _) = manager_with(&loader);
        let b = TestItem::data_object(
            id(5),
            "cell_a",
            vec![PropertyValue::Link(link(6, "cell_b"))],
        );
        b.linkable().attach(&patient).unwrap();
        let stats = patient.tick();
        assert!(!stats.budget_exhausted);
        assert_eq!(stats.placeholders_created, 1);
    }

    #[test]
    fn test_entries_of_unregistered_anchor_are_discarded() {
        let loader = TestLoader::new();
        let (manager, _) = manager_with(&loader);
        let a = TestItem::data_object(
            id(1),
            "cell_a",
            vec![PropertyValue::Link(link(2, "cell_b"))],
        );
        a.linkable().attach(&manager).unwrap();
        manager.reset();
        manager.add_pending_link(crate::manager::PendingLink::new(
            id(1),
            partition("cell_a"),
            id(2),
            partition("cell_b"),
        ));

        let stats = manager.tick();
        assert_eq!(stats.discarded, 1);
        assert!(manager.is_idle());
    }
}
