mod addr;

pub use addr::{cloud_addr, public_addr, TEST_PORTS};
use peergroup_topology::{ControllerMember, MemberStatus};

/// Installs a log subscriber for the test if one is not already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// A healthy controller which wants a vote and has a cloud local
/// and a public address.
pub fn controller(id: u64) -> ControllerMember {
    ControllerMember::new(
        id,
        vec![public_addr(id), cloud_addr(id)],
        true,
        MemberStatus::Healthy,
    )
}

/// A controller with an explicit vote preference and status.
pub fn controller_with(id: u64, wants_vote: bool, status: MemberStatus) -> ControllerMember {
    let mut member = controller(id);
    member.wants_vote = wants_vote;
    member.status = status;
    member
}

/// Healthy controllers for each of the given ids.
pub fn controllers(ids: impl IntoIterator<Item = u64>) -> Vec<ControllerMember> {
    ids.into_iter().map(controller).collect()
}
