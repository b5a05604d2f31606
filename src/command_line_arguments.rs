use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "portway", about, version, long_about = None)]
pub struct PortwayArguments {
    #[arg(short = 'c', long = "config", default_value = "config.json", help = "Path to the configuration file")]
    pub config_path: String,

    #[arg(short = 't', long = "timeout", default_value_t = 10, help = "Upstream dial timeout in seconds, used when a rule does not set its own")]
    pub dial_timeout: u64,

    #[arg(short = 'k', long = "keepalive", default_value_t = 30, help = "TCP keep-alive interval in seconds, used when a rule does not set its own")]
    pub keepalive: u64,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,
}
