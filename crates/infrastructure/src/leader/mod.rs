//! Project leader clients. The configured leader kind is resolved once at
//! construction time into a bound implementation.

pub mod http;
pub mod nop;

use std::sync::Arc;

use runplane_core::config::{LeaderKind, ProjectsConfig};
use runplane_core::traits::ProjectLeader;

pub use http::HttpProjectLeader;
pub use nop::NopProjectLeader;

pub fn build_leader(config: &ProjectsConfig) -> Arc<dyn ProjectLeader> {
    match config.leader {
        LeaderKind::Http => Arc::new(HttpProjectLeader::new(config)),
        LeaderKind::Nop => Arc::new(NopProjectLeader::new()),
    }
}
