use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 11400)]
    pub port: u16,
    /// Sets the maximum allowed job size, in bytes (including the trailing
    /// CR-LF the client sends after the body).
    #[arg(short = 'z', long, default_value_t = 65535)]
    pub max_job_size: u32,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
    /// Starts the server already refusing new jobs.
    #[arg(long, default_value_t)]
    pub drain: bool,
}
