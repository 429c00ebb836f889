use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::address::{AddressPolicy, HostPort};
use crate::model::{
    majority,
    AppliedConfiguration,
    ControllerId,
    ControllerMember,
    ReplicaSetMember,
    Topology,
};
use crate::TopologyError;

#[derive(Debug, Clone, Eq, PartialEq)]
/// The single structural move a step makes.
pub enum StepKind {
    /// The initial configuration, written when no voters exist yet.
    Bootstrap { voters: usize },
    /// One voter is replaced by another, the voter count is unchanged.
    Swap {
        demoted: ControllerId,
        promoted: ControllerId,
    },
    /// Two members gain a vote together to keep the voter count odd.
    PromotePair(ControllerId, ControllerId),
    /// Two members lose their vote together to keep the voter count odd.
    DemotePair(ControllerId, ControllerId),
    /// A single member gains a vote, only used to repair an even voter count.
    Promote(ControllerId),
    /// A single member loses its vote, only used to repair an even voter count.
    Demote(ControllerId),
    /// A non-voting member is added.
    AddMember(ControllerId),
    /// A non-voting member is removed.
    RemoveMember(ControllerId),
    /// Only member addresses changed.
    AddressesOnly,
}

impl Display for StepKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Bootstrap { voters } => write!(f, "bootstrap with {} voters", voters),
            StepKind::Swap { demoted, promoted } => {
                write!(f, "swap vote from {} to {}", demoted, promoted)
            },
            StepKind::PromotePair(a, b) => write!(f, "promote {} and {}", a, b),
            StepKind::DemotePair(a, b) => write!(f, "demote {} and {}", a, b),
            StepKind::Promote(id) => write!(f, "promote {}", id),
            StepKind::Demote(id) => write!(f, "demote {}", id),
            StepKind::AddMember(id) => write!(f, "add non-voting member {}", id),
            StepKind::RemoveMember(id) => write!(f, "remove member {}", id),
            StepKind::AddressesOnly => write!(f, "update addresses"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// The next topology to apply.
pub struct Step {
    pub topology: Topology,
    pub kind: StepKind,
    /// Members whose address changed as part of this step.
    pub address_updates: Vec<ControllerId>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// Why a non-converged topology cannot make progress right now.
pub enum Deferral {
    /// A legacy configuration has an even number of voters and no safe repair exists.
    EvenVoters { voters: usize },
    /// A voter no longer eligible cannot lose its vote without losing quorum
    /// and no replacement is available.
    IneligibleVoter(ControllerId),
}

impl Display for Deferral {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Deferral::EvenVoters { voters } => {
                write!(f, "{} voters configured and no safe repair is available", voters)
            },
            Deferral::IneligibleVoter(id) => {
                write!(f, "controller {} must keep its vote until a replacement is available", id)
            },
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StepOutcome {
    /// The applied configuration already matches the best reachable target.
    Unchanged,
    /// Nothing can be applied safely until the observed controllers change.
    Deferred(Deferral),
    /// Apply the given step.
    Next(Step),
}

#[derive(Debug)]
struct Observed {
    host_port: Option<HostPort>,
    wants_vote: bool,
    healthy: bool,
}

impl Observed {
    #[inline]
    fn eligible(&self) -> bool {
        self.wants_vote && self.host_port.is_some()
    }
}

/// Computes the next single safe step from the applied configuration towards
/// the ideal topology for the observed controllers.
///
/// Every controller which wants the controller role and has a resolvable
/// address ideally holds a vote. Getting there may take several steps, each
/// step:
///
/// - Keeps an odd number of voters.
/// - Makes at most one structural move, a voter swap or a pair of voters
///   changing together count as one move as they keep the count odd.
/// - Retains a majority of the previous voters.
/// - Leaves existing eligible voters alone and picks the lowest ids first.
///
/// Address changes of existing members are applied alongside any move.
pub fn compute_next_step(
    controllers: &[ControllerMember],
    applied: Option<&AppliedConfiguration>,
    policy: &AddressPolicy,
) -> Result<StepOutcome, TopologyError> {
    let observed = controllers
        .iter()
        .map(|controller| {
            let observed = Observed {
                host_port: policy.management_host_port(controller),
                wants_vote: controller.wants_vote,
                healthy: controller.is_healthy(),
            };
            (controller.id, observed)
        })
        .collect::<BTreeMap<_, _>>();

    if !observed.values().any(Observed::eligible) {
        return Err(TopologyError::NoEligibleControllers);
    }

    let current = match applied {
        Some(applied) if applied.topology.voter_count() > 0 => &applied.topology,
        _ => {
            let step = bootstrap(&observed);
            step.topology.validate()?;
            return Ok(StepOutcome::Next(step));
        },
    };

    let planner = Planner::new(current, &observed);
    let outcome = planner.plan();

    if let StepOutcome::Next(step) = &outcome {
        step.topology.validate()?;
        check_quorum(current, &step.topology)?;
    }

    Ok(outcome)
}

/// Checks that `next` retains a majority of the voters in `previous`.
pub fn check_quorum(previous: &Topology, next: &Topology) -> Result<(), TopologyError> {
    let previous_voters = previous.voters();
    let retained = previous_voters.intersection(&next.voters()).count();
    let required = majority(previous_voters.len());

    if retained < required {
        return Err(TopologyError::QuorumNotPreserved {
            previous: previous_voters.len(),
            retained,
            required,
        });
    }

    Ok(())
}

#[inline]
fn largest_odd(n: usize) -> usize {
    if n % 2 == 0 {
        n.saturating_sub(1)
    } else {
        n
    }
}

fn bootstrap(observed: &BTreeMap<ControllerId, Observed>) -> Step {
    let eligible = observed
        .iter()
        .filter(|(_, obs)| obs.eligible())
        .collect::<Vec<_>>();

    let healthy = eligible
        .iter()
        .filter(|(_, obs)| obs.healthy)
        .map(|(id, _)| **id)
        .collect::<Vec<_>>();
    let pool: Vec<ControllerId> = if healthy.is_empty() {
        eligible.iter().map(|(id, _)| **id).collect()
    } else {
        healthy
    };

    let voters = pool
        .iter()
        .copied()
        .take(largest_odd(pool.len()))
        .collect::<BTreeSet<_>>();

    let topology = eligible
        .into_iter()
        .filter_map(|(id, obs)| {
            obs.host_port
                .clone()
                .map(|hp| ReplicaSetMember::new(*id, hp, voters.contains(id)))
        })
        .collect();

    Step {
        topology,
        kind: StepKind::Bootstrap {
            voters: voters.len(),
        },
        address_updates: Vec::new(),
    }
}

enum VoterMove {
    Move(Topology, StepKind),
    Blocked(Deferral),
    None,
}

struct Planner<'a> {
    current: &'a Topology,
    observed: &'a BTreeMap<ControllerId, Observed>,
    /// The current topology with refreshed addresses.
    base: Topology,
    address_updates: Vec<ControllerId>,
    voters: BTreeSet<ControllerId>,
    candidates: Vec<ControllerId>,
}

impl<'a> Planner<'a> {
    fn new(current: &'a Topology, observed: &'a BTreeMap<ControllerId, Observed>) -> Self {
        let mut base = current.clone();
        let mut address_updates = Vec::new();
        for member in current.members() {
            let host_port = observed
                .get(&member.id)
                .and_then(|obs| obs.host_port.as_ref());

            if let Some(hp) = host_port {
                if hp != &member.address {
                    if let Some(member) = base.get_mut(member.id) {
                        member.address = hp.clone();
                    }
                    address_updates.push(member.id);
                }
            }
        }

        let voters = current.voters();
        let candidates = observed
            .iter()
            .filter(|(id, obs)| obs.eligible() && obs.healthy && !voters.contains(*id))
            .map(|(id, _)| *id)
            .collect();

        Self {
            current,
            observed,
            base,
            address_updates,
            voters,
            candidates,
        }
    }

    fn is_eligible(&self, id: ControllerId) -> bool {
        self.observed.get(&id).map_or(false, Observed::eligible)
    }

    fn is_healthy(&self, id: ControllerId) -> bool {
        self.observed.get(&id).map_or(false, |obs| obs.healthy)
    }

    fn ineligible_voters(&self) -> Vec<ControllerId> {
        self.voters
            .iter()
            .copied()
            .filter(|id| !self.is_eligible(*id))
            .collect()
    }

    fn unhealthy_voters(&self) -> Vec<ControllerId> {
        self.voters
            .iter()
            .copied()
            .filter(|id| self.is_eligible(*id) && !self.is_healthy(*id))
            .collect()
    }

    /// Voters in the order they should give up their vote when one must go
    /// for parity: ineligible first, then unhealthy, then the highest ids.
    fn demotion_order(&self) -> Vec<ControllerId> {
        let mut order = self.ineligible_voters();
        order.extend(self.unhealthy_voters());
        order.extend(
            self.voters
                .iter()
                .rev()
                .copied()
                .filter(|id| self.is_eligible(*id) && self.is_healthy(*id)),
        );
        order
    }

    fn plan(self) -> StepOutcome {
        let mut pinned = None;
        let voter_move = match self.voter_move() {
            VoterMove::Blocked(deferral @ Deferral::EvenVoters { .. }) => {
                return StepOutcome::Deferred(deferral);
            },
            VoterMove::Blocked(deferral) => {
                pinned = Some(deferral);
                None
            },
            VoterMove::Move(topology, kind) => Some((topology, kind)),
            VoterMove::None => None,
        };

        let next = voter_move.or_else(|| self.membership_move());
        let (topology, kind) = match next {
            Some(next) => next,
            None if !self.address_updates.is_empty() => {
                (self.base.clone(), StepKind::AddressesOnly)
            },
            None => {
                return match pinned {
                    Some(deferral) => StepOutcome::Deferred(deferral),
                    None => StepOutcome::Unchanged,
                };
            },
        };

        StepOutcome::Next(Step {
            topology,
            kind,
            address_updates: self.address_updates,
        })
    }

    fn voter_move(&self) -> VoterMove {
        let n = self.voters.len();

        if n % 2 == 0 {
            if let Some(promoted) = self.candidates.first().copied() {
                if let Some(topology) = self.try_change(&[promoted], &[]) {
                    return VoterMove::Move(topology, StepKind::Promote(promoted));
                }
            }

            for demoted in self.demotion_order() {
                if let Some(topology) = self.try_change(&[], &[demoted]) {
                    return VoterMove::Move(topology, StepKind::Demote(demoted));
                }
            }

            return VoterMove::Blocked(Deferral::EvenVoters { voters: n });
        }

        let ineligible = self.ineligible_voters();
        if let Some(demoted) = ineligible.first().copied() {
            if let Some(promoted) = self.candidates.first().copied() {
                if let Some(topology) = self.try_change(&[promoted], &[demoted]) {
                    return VoterMove::Move(topology, StepKind::Swap { demoted, promoted });
                }
            }

            let partner = self
                .demotion_order()
                .into_iter()
                .find(|id| *id != demoted);
            if let Some(partner) = partner {
                if let Some(topology) = self.try_change(&[], &[demoted, partner]) {
                    return VoterMove::Move(topology, StepKind::DemotePair(demoted, partner));
                }
            }

            // The ineligible voter cannot go yet, grow the group with healthy
            // replacements so it can be removed in a later step.
            if let [a, b, ..] = self.candidates[..] {
                if let Some(topology) = self.try_change(&[a, b], &[]) {
                    return VoterMove::Move(topology, StepKind::PromotePair(a, b));
                }
            }

            return VoterMove::Blocked(Deferral::IneligibleVoter(demoted));
        }

        if let (Some(demoted), Some(promoted)) = (
            self.unhealthy_voters().first().copied(),
            self.candidates.first().copied(),
        ) {
            if let Some(topology) = self.try_change(&[promoted], &[demoted]) {
                return VoterMove::Move(topology, StepKind::Swap { demoted, promoted });
            }
        }

        let target = largest_odd(n + self.candidates.len());
        if n < target {
            if let [a, b, ..] = self.candidates[..] {
                if let Some(topology) = self.try_change(&[a, b], &[]) {
                    return VoterMove::Move(topology, StepKind::PromotePair(a, b));
                }
            }
        }

        VoterMove::None
    }

    /// Non-voting membership changes, only made when no voter move is pending.
    fn membership_move(&self) -> Option<(Topology, StepKind)> {
        let removable = self
            .base
            .members()
            .find(|member| !member.voting && !self.is_eligible(member.id))
            .map(|member| member.id);
        if let Some(id) = removable {
            let mut topology = self.base.clone();
            topology.remove(id);
            return Some((topology, StepKind::RemoveMember(id)));
        }

        let addable = self.observed.iter().find_map(|(id, obs)| {
            if self.base.contains(*id) || !obs.eligible() {
                return None;
            }
            obs.host_port.clone().map(|hp| (*id, hp))
        });
        if let Some((id, host_port)) = addable {
            let mut topology = self.base.clone();
            topology.insert(ReplicaSetMember::new(id, host_port, false));
            return Some((topology, StepKind::AddMember(id)));
        }

        None
    }

    /// Applies a voter change to the base topology, returning it only if the
    /// result is valid and retains quorum.
    fn try_change(
        &self,
        promote: &[ControllerId],
        demote: &[ControllerId],
    ) -> Option<Topology> {
        let mut topology = self.base.clone();

        for id in promote {
            if !topology.set_voting(*id, true) {
                let host_port = self.observed.get(id)?.host_port.clone()?;
                topology.insert(ReplicaSetMember::new(*id, host_port, true));
            }
        }

        for id in demote {
            topology.set_voting(*id, false);
        }

        if topology.validate().is_err() || check_quorum(self.current, &topology).is_err() {
            return None;
        }

        Some(topology)
    }
}
