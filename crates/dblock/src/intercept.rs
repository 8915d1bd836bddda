use std::sync::Arc;

use anyhow::Context as _;
use nfq::{Queue, Verdict};

use crate::filter::{filter_query, steer_upstream, Decision};
use crate::State;

/// Which decision function a queue runner applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPoint {
    /// Inbound DNS queries: blocked domains are answered with NXDOMAIN
    Query,
    /// Locally originated DNS queries: destination resolver steering
    Upstream,
}

impl InterceptPoint {
    fn apply(self, packet: &mut [u8], state: &State) -> Decision {
        match self {
            InterceptPoint::Query => filter_query(packet, state),
            InterceptPoint::Upstream => steer_upstream(packet, state),
        }
    }
}

/// Binds to a netfilter queue and runs its decision function on every
/// delivered packet. Blocks the calling thread until a receive fails.
///
/// Every packet is accepted: a mutated packet travels on with its rewrite,
/// everything else passes through untouched. Dropping is never the
/// mechanism here, the NXDOMAIN rewrite is what stops the lookup.
pub fn run_queue(queue_num: u16, point: InterceptPoint, state: Arc<State>) -> anyhow::Result<()> {
    let mut queue = Queue::open().context("failed to open a netfilter queue handle")?;
    queue
        .bind(queue_num)
        .with_context(|| format!("failed to bind to netfilter queue {}", queue_num))?;
    tracing::info!(queue_num, ?point, "attached to netfilter queue");

    loop {
        let mut msg = queue
            .recv()
            .with_context(|| format!("receive failed on netfilter queue {}", queue_num))?;

        let mut packet = msg.get_payload().to_vec();
        if point.apply(&mut packet, &state) == Decision::Mutated {
            msg.set_payload(packet);
        }

        msg.set_verdict(Verdict::Accept);
        queue.verdict(msg).context("failed to place a verdict")?;
    }
}
