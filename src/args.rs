use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:3536", env = "HOST")]
    pub host: SocketAddr,
}
