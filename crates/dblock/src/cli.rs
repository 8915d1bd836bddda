use std::net::IpAddr;

use clap::Parser;

#[derive(Parser)]
#[command(version, name = "dblock")]
pub struct Args {
    /// Management server address
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    pub control_host: IpAddr,
    #[arg(long, value_name = "PORT", default_value_t = 65433)]
    pub control_port: u16,
    /// Netfilter queue receiving inbound DNS queries
    #[arg(long, value_name = "QUEUE", default_value_t = 0)]
    pub query_queue: u16,
    /// Netfilter queue receiving locally originated DNS queries
    #[arg(long, value_name = "QUEUE", default_value_t = 1)]
    pub upstream_queue: u16,
    /// Run the control channel only, without attaching to the queues
    #[arg(short('d'), long, default_value_t = false)]
    pub disable_intercept: bool,
}
