//! Project state following: a local read cache over an authoritative
//! external leader, with forwarded writes and periodic full syncs.

pub mod follower;

pub use follower::ProjectFollower;
