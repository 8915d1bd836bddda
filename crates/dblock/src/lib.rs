mod logging;
pub use logging::setup_logging;
mod cache;
pub use cache::{BlocklistCache, Policy};
mod extract;
pub use extract::{get_field, get_operation_code, ExtractError};
mod control;
pub use control::{ChannelState, ControlChannel, ProtocolError};
mod filter;
pub use filter::{filter_query, steer_upstream, Decision};
mod intercept;
pub use intercept::{run_queue, InterceptPoint};
mod cli;
pub use cli::Args;
mod app;
pub use app::App;

use std::net::Ipv4Addr;

/// Longest domain entry accepted from the control channel
pub const MAX_DOMAIN_LENGTH: usize = 256;
/// Largest control message read in one receive
pub const MAX_PAYLOAD: usize = 1024;
pub const DNS_PORT: u16 = 53;

/// Upstream resolver that filters ads
pub const AD_FILTERING_DNS: Ipv4Addr = Ipv4Addr::new(94, 140, 14, 14);
/// Upstream resolver that filters adult content
pub const ADULT_FILTERING_DNS: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 3);
/// Upstream resolver that filters both
pub const FAMILY_DNS: Ipv4Addr = Ipv4Addr::new(94, 140, 14, 15);

/// Shared filtering state, created at subsystem start and passed by
/// reference into the control channel and the interception points.
pub struct State {
    pub cache: BlocklistCache,
}

impl State {
    pub fn new() -> Self {
        State {
            cache: BlocklistCache::new(),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
