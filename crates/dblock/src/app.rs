use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;

use crate::control::ControlChannel;
use crate::intercept::{run_queue, InterceptPoint};
use crate::{Args, State};

pub struct App;

impl App {
    pub async fn run_until_completion(args: Args) -> anyhow::Result<()> {
        let state = Arc::new(State::new());

        let control_addr = SocketAddr::new(args.control_host, args.control_port);
        let channel = ControlChannel::connect(control_addr, state.clone())
            .await
            .context("failed to establish the control channel")?;

        // The queue runners do blocking netlink receives, so they get
        // dedicated threads instead of the async runtime
        if !args.disable_intercept {
            for (queue_num, point) in [
                (args.query_queue, InterceptPoint::Query),
                (args.upstream_queue, InterceptPoint::Upstream),
            ] {
                let state = state.clone();
                std::thread::spawn(move || {
                    if let Err(e) = run_queue(queue_num, point, state) {
                        tracing::error!(queue_num, "queue runner exited: {:#}", e);
                    }
                });
            }
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for the shutdown signal")?;
        tracing::info!("shutting down");

        channel.shutdown().await
    }
}
