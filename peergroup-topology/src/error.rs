use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TopologyError {
    #[error(
        "No controller is eligible to vote, at least one controller must want the \
        controller role and have a resolvable address."
    )]
    /// There is no safe topology which can be produced.
    NoEligibleControllers,

    #[error("Topology has {voters} voting members, expected an odd number of at least one.")]
    /// The topology breaks the odd voter invariant.
    InvalidVoterCount { voters: usize },

    #[error(
        "Transition retains {retained} of {previous} voters which is below the \
        required majority of {required}."
    )]
    /// The transition between two topologies would lose quorum.
    QuorumNotPreserved {
        previous: usize,
        retained: usize,
        required: usize,
    },
}
