use clap::Parser;

use crate::ring;

#[derive(Debug, Parser, Clone)]
pub struct Config {
    /// Address the HTTP router binds to.
    #[arg(long, env = "RINGROUTE_LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    pub listen_addr: String,

    /// Number of slots on the hash ring.
    #[arg(
        long,
        env = "RINGROUTE_SLOTS",
        default_value_t = ring::DEFAULT_SLOTS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub slots: u64,

    /// Backend nodes registered at startup, comma separated.
    #[arg(long, env = "RINGROUTE_NODES", value_delimiter = ',', num_args = 0..)]
    pub nodes: Vec<String>,
}
