pub mod compiler;
pub mod normalizer;

pub use compiler::{HttpRoute, RouteSet, RouteTable, TcpRoute, compile};
pub use normalizer::{HostPattern, ListenKey, ListenScheme, NormalizedRule, SchemeClass, normalize_rule};

use std::time::Duration;

/// Global fallbacks for per-rule timeouts, taken from the command line.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub dial_timeout: Duration,
    pub keepalive: Duration,
}
