use std::collections::BTreeSet;

use peergroup_topology::{
    compute_next_step,
    majority,
    Address,
    AddressPolicy,
    AppliedConfiguration,
    ControllerMember,
    MemberStatus,
    ReplicaSetMember,
    StepOutcome,
    Topology,
    TopologyError,
};
use proptest::prelude::*;
use test_helper::{cloud_addr, controller_with, TEST_PORTS};

const MAX_STEPS: usize = 32;

fn controllers_strategy() -> impl Strategy<Value = Vec<ControllerMember>> {
    let flags = (
        prop::bool::weighted(0.8),
        prop::bool::weighted(0.85),
        prop::bool::weighted(0.9),
    );

    prop::collection::btree_map(0u64..9, flags, 0..8).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(id, (wants_vote, healthy, routable))| {
                let status = if healthy {
                    MemberStatus::Healthy
                } else {
                    MemberStatus::Unhealthy
                };
                let mut member = controller_with(id, wants_vote, status);
                if !routable {
                    member.addresses = vec![Address::derive("127.0.0.1")];
                }
                member
            })
            .collect()
    })
}

fn applied_strategy() -> impl Strategy<Value = Option<AppliedConfiguration>> {
    prop::collection::btree_map(0u64..9, (any::<bool>(), prop::bool::weighted(0.2)), 0..7)
        .prop_map(|entries| {
            if entries.is_empty() {
                return None;
            }

            let topology = entries
                .into_iter()
                .map(|(id, (voting, stale))| {
                    let addr = if stale {
                        Address::derive(format!("10.99.0.{}", id + 1))
                    } else {
                        cloud_addr(id)
                    };
                    ReplicaSetMember::new(id, addr.with_port(TEST_PORTS.management), voting)
                })
                .collect::<Topology>();
            Some(AppliedConfiguration::new(topology, 1))
        })
}

fn policy() -> AddressPolicy {
    AddressPolicy::new(TEST_PORTS)
}

fn has_eligible(controllers: &[ControllerMember], policy: &AddressPolicy) -> bool {
    controllers
        .iter()
        .any(|c| c.wants_vote && policy.management_host_port(c).is_some())
}

/// Ids which joined or left the set without their vote changing.
fn non_voting_presence_changes(previous: &Topology, next: &Topology) -> usize {
    let voter_changes = previous
        .voters()
        .symmetric_difference(&next.voters())
        .copied()
        .collect::<BTreeSet<_>>();

    previous
        .ids()
        .symmetric_difference(&next.ids())
        .filter(|id| !voter_changes.contains(id))
        .count()
}

proptest! {
    #[test]
    fn emitted_topologies_are_safe_single_steps(
        controllers in controllers_strategy(),
        applied in applied_strategy(),
    ) {
        let policy = policy();
        let result = compute_next_step(&controllers, applied.as_ref(), &policy);

        if !has_eligible(&controllers, &policy) {
            prop_assert_eq!(result, Err(TopologyError::NoEligibleControllers));
            return Ok(());
        }

        let outcome = result.expect("Only the no eligible controllers error is expected.");
        let step = match outcome {
            StepOutcome::Next(step) => step,
            _ => return Ok(()),
        };

        prop_assert_eq!(step.topology.voter_count() % 2, 1);

        let previous = match applied.as_ref() {
            Some(applied) if applied.topology.voter_count() > 0 => &applied.topology,
            // Bootstrapping has no previous voters to compare against.
            _ => return Ok(()),
        };

        let previous_voters = previous.voters();
        let next_voters = step.topology.voters();
        let retained = previous_voters.intersection(&next_voters).count();
        prop_assert!(retained >= majority(previous_voters.len()));

        let voter_delta = previous_voters.symmetric_difference(&next_voters).count();
        prop_assert!(voter_delta <= 2, "voter delta {} in {:?}", voter_delta, step.kind);

        let presence = non_voting_presence_changes(previous, &step.topology);
        if voter_delta > 0 {
            prop_assert_eq!(presence, 0);
        } else {
            prop_assert!(presence <= 1);
        }
    }

    #[test]
    fn repeated_steps_converge(
        controllers in controllers_strategy(),
        applied in applied_strategy(),
    ) {
        let policy = policy();
        prop_assume!(has_eligible(&controllers, &policy));

        let mut applied = applied;
        let mut converged = false;
        for version in 0..MAX_STEPS {
            match compute_next_step(&controllers, applied.as_ref(), &policy) {
                Ok(StepOutcome::Next(step)) => {
                    applied = Some(AppliedConfiguration::new(step.topology, version as u64));
                },
                Ok(StepOutcome::Unchanged) => {
                    // Only eligible controllers may be left holding a vote.
                    let topology = &applied.as_ref().expect("Applied topology").topology;
                    for id in topology.voters() {
                        let controller = controllers.iter().find(|c| c.id == id);
                        prop_assert!(controller.map_or(false, |c| c.wants_vote));
                    }
                    converged = true;
                    break;
                },
                Ok(StepOutcome::Deferred(_)) => {
                    converged = true;
                    break;
                },
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }

        prop_assert!(converged, "topology did not converge within {} steps", MAX_STEPS);
    }
}

#[test]
fn test_grow_from_one_to_five_controllers() {
    test_helper::init_tracing();

    let policy = policy();
    let mut applied: Option<AppliedConfiguration> = None;
    let mut history = Vec::new();

    for count in 1..=5u64 {
        let controllers = test_helper::controllers(0..count);

        loop {
            match compute_next_step(&controllers, applied.as_ref(), &policy).unwrap() {
                StepOutcome::Next(step) => {
                    history.push((count, step.topology.voter_count()));
                    applied = Some(AppliedConfiguration::new(step.topology, history.len() as u64));
                },
                StepOutcome::Unchanged => break,
                StepOutcome::Deferred(deferral) => panic!("Unexpected deferral {}", deferral),
            }
        }
    }

    assert_eq!(
        history,
        vec![
            // Bootstrap.
            (1, 1),
            // Held back as a non-voter.
            (2, 1),
            // A third controller allows both to vote.
            (3, 3),
            (4, 3),
            (5, 5),
        ]
    );
}
