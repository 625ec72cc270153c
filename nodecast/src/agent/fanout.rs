//! Tree fan-out planning.
//!
//! Given N targets and a direct fan-out width `T`, the planner partitions the
//! targets into at most `T` groups. Each group's first member is contacted
//! directly; the remainder rides along as that leader's forward list, to be
//! relayed node-to-node in sub-groups of at most `spread` targets. This caps
//! controller-originated connections at `min(N, T)` regardless of fleet size.
//!
//! Groups are filled round-robin from the input order, which keeps group
//! sizes within one of each other (`ceil(N/T)` vs `floor(N/T)`).

use super::request::TargetNode;

/// One planned dispatch group: a directly-contacted leader plus the targets
/// the leader is asked to relay to.
#[derive(Clone, Debug)]
pub struct DispatchGroup {
    /// The node the controller contacts directly.
    pub leader: TargetNode,

    /// Targets reached through the leader, possibly over multiple hops.
    pub forwards: Vec<TargetNode>,
}

impl DispatchGroup {
    /// Total targets covered by this group, leader included.
    pub fn len(&self) -> usize {
        1 + self.forwards.len()
    }

    /// True when the group has no relay work.
    pub fn is_direct_only(&self) -> bool {
        self.forwards.is_empty()
    }
}

/// A complete fan-out plan for one broadcast run.
#[derive(Clone, Debug)]
pub struct FanoutPlan {
    /// Dispatch groups, one per direct connection.
    pub groups: Vec<DispatchGroup>,

    /// Per-hop relay width carried in each group's envelope.
    pub spread: usize,
}

impl FanoutPlan {
    /// Number of connections the controller itself opens.
    pub fn direct_contacts(&self) -> usize {
        self.groups.len()
    }

    /// Total targets covered by the plan.
    pub fn target_count(&self) -> usize {
        self.groups.iter().map(DispatchGroup::len).sum()
    }
}

/// Partitions `targets` into a fan-out plan.
///
/// Produces `min(targets.len(), fanout_width)` groups. With N ≤ fanout_width
/// every node is contacted directly and no relaying happens.
///
/// `fanout_width` must be at least 1; settings validation enforces this
/// before a plan is ever built.
pub fn plan(targets: &[TargetNode], fanout_width: usize, spread: usize) -> FanoutPlan {
    debug_assert!(fanout_width >= 1, "fanout width must be at least 1");

    let group_count = targets.len().min(fanout_width).max(1);
    let mut buckets: Vec<Vec<TargetNode>> = vec![Vec::new(); group_count];

    for (i, target) in targets.iter().enumerate() {
        buckets[i % group_count].push(target.clone());
    }

    let groups = buckets
        .into_iter()
        .filter(|bucket| !bucket.is_empty())
        .map(|mut bucket| {
            let leader = bucket.remove(0);
            DispatchGroup {
                leader,
                forwards: bucket,
            }
        })
        .collect();

    FanoutPlan { groups, spread }
}
