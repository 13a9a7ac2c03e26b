use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::{Error, Result};

/// Poll interval expressed as a power-of-two exponent in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Poll(pub i8);

impl Poll {
    /// Creates a poll exponent, clamped to the supported range
    pub fn new(exponent: i8) -> Self {
        Poll(exponent.clamp(super::POLL_FLOOR, super::POLL_CEILING))
    }

    /// Returns the raw exponent
    pub fn exponent(&self) -> i8 {
        self.0
    }

    /// Returns the interval this exponent stands for
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(2f64.powi(self.0 as i32))
    }

    /// One step longer, never beyond `max`
    pub fn increase(self, max: Poll) -> Self {
        Poll(self.0.saturating_add(1).min(max.0))
    }

    /// One step shorter, never below `min`
    pub fn decrease(self, min: Poll) -> Self {
        Poll(self.0.saturating_sub(1).max(min.0))
    }

    /// Clamps into `[min, max]`
    pub fn clamp_to(self, min: Poll, max: Poll) -> Self {
        Poll(self.0.clamp(min.0, max.0))
    }
}

impl fmt::Display for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "2^{}s", self.0)
    }
}

/// A configured time server: host name or address literal plus port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId {
    host: String,
    port: u16,
}

impl ServerId {
    /// Creates a server identifier from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerId { host: host.into(), port }
    }

    /// Host name or address literal
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Service port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The socket address when the host is an IP literal, so no lookup is needed
    pub fn literal_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for ServerId {
    fn from(addr: SocketAddr) -> Self {
        ServerId::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for ServerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("empty server name"));
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(ServerId::new(ip.to_string(), super::DEFAULT_PORT));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let ip = inner
                .parse::<Ipv6Addr>()
                .map_err(|e| Error::config(format!("invalid IPv6 server '{}': {}", s, e)))?;
            return Ok(ServerId::new(ip.to_string(), super::DEFAULT_PORT));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || host.contains(':') {
                    return Err(Error::config(format!("invalid server '{}'", s)));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|e| Error::config(format!("invalid port in '{}': {}", s, e)))?;
                Ok(ServerId::new(host, port))
            }
            None => Ok(ServerId::new(s, super::DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for ServerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ServerId> for String {
    fn from(server: ServerId) -> String {
        server.to_string()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Configuration for the network clock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Servers to query; host names may expand to several associations
    pub servers: Vec<ServerId>,
    /// Local addresses to bind, one socket per address family
    pub bind_addrs: Vec<SocketAddr>,
    /// Shortest poll interval exponent
    pub min_poll: Poll,
    /// Longest poll interval exponent
    pub max_poll: Poll,
    /// Samples an association needs before it may be trusted
    pub min_samples: usize,
    /// Largest dispersion (seconds) a trusted association may carry
    pub max_dispersion: f64,
    /// Largest round-trip delay (seconds) accepted as a sample
    pub max_delay: f64,
    /// Consecutive missed cycles after which trust is withdrawn
    pub failure_threshold: u32,
    /// Minimum spacing between pushed offset recomputations
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub recompute_interval: Duration,
    /// Capacity of the inbound datagram channel
    pub channel_capacity: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            servers: super::DEFAULT_SERVERS
                .iter()
                .map(|host| ServerId::new(*host, super::DEFAULT_PORT))
                .collect(),
            bind_addrs: vec![
                SocketAddr::from(([0, 0, 0, 0], 0)),
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            ],
            min_poll: Poll(super::DEFAULT_MIN_POLL),
            max_poll: Poll(super::DEFAULT_MAX_POLL),
            min_samples: super::MIN_SAMPLES_FOR_TRUST,
            max_dispersion: 0.25,
            max_delay: 4.0,
            failure_threshold: 4,
            recompute_interval: Duration::from_secs(1),
            channel_capacity: 256,
        }
    }
}

impl ClockConfig {
    /// Creates a configuration for the given servers with default tuning
    pub fn with_servers<I, S>(servers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let servers = servers
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<ServerId>>>()?;
        Ok(ClockConfig {
            servers,
            ..Default::default()
        })
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::config("no servers configured"));
        }
        if self.bind_addrs.is_empty() {
            return Err(Error::config("no bind addresses configured"));
        }

        let range = super::POLL_FLOOR..=super::POLL_CEILING;
        if !range.contains(&self.min_poll.0) || !range.contains(&self.max_poll.0) {
            return Err(Error::config(format!(
                "poll exponents must lie within {}..={}",
                super::POLL_FLOOR,
                super::POLL_CEILING
            )));
        }
        if self.min_poll > self.max_poll {
            return Err(Error::config("min_poll exceeds max_poll"));
        }

        if self.min_samples == 0 || self.min_samples > super::SAMPLE_CAPACITY {
            return Err(Error::config(format!(
                "min_samples must lie within 1..={}",
                super::SAMPLE_CAPACITY
            )));
        }
        if !(self.max_dispersion.is_finite() && self.max_dispersion > 0.0) {
            return Err(Error::config("max_dispersion must be a positive number of seconds"));
        }
        if !(self.max_delay.is_finite() && self.max_delay > 0.0) {
            return Err(Error::config("max_delay must be a positive number of seconds"));
        }
        if self.failure_threshold == 0 {
            return Err(Error::config("failure_threshold must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_creation() {
        let poll = Poll::new(3);
        assert_eq!(poll.0, 3);

        // Test range limit
        let poll = Poll::new(i8::MAX);
        assert_eq!(poll.0, super::super::POLL_CEILING);
        assert_eq!(Poll(4).interval(), Duration::from_secs(16));
        assert_eq!(Poll(-1).interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_poll_steps_are_bounded() {
        let (min, max) = (Poll(2), Poll(4));
        assert_eq!(Poll(4).increase(max), Poll(4));
        assert_eq!(Poll(3).increase(max), Poll(4));
        assert_eq!(Poll(2).decrease(min), Poll(2));
        assert_eq!(Poll(9).clamp_to(min, max), Poll(4));
    }

    #[test]
    fn test_server_id_parsing() {
        let s: ServerId = "pool.ntp.org".parse().unwrap();
        assert_eq!(s.host(), "pool.ntp.org");
        assert_eq!(s.port(), 123);
        assert!(s.literal_addr().is_none());

        let s: ServerId = "time.example:1123".parse().unwrap();
        assert_eq!(s.port(), 1123);

        let s: ServerId = "192.0.2.1".parse().unwrap();
        assert_eq!(s.literal_addr(), Some("192.0.2.1:123".parse().unwrap()));

        let s: ServerId = "[2001:db8::1]:4123".parse().unwrap();
        assert_eq!(s.literal_addr(), Some("[2001:db8::1]:4123".parse().unwrap()));
        assert_eq!(s.to_string(), "[2001:db8::1]:4123");

        let s: ServerId = "2001:db8::2".parse().unwrap();
        assert_eq!(s.port(), 123);

        assert!("".parse::<ServerId>().is_err());
        assert!("host:notaport".parse::<ServerId>().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(ClockConfig::default().validate().is_ok());

        let config = ClockConfig {
            servers: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ClockConfig {
            min_poll: Poll(6),
            max_poll: Poll(4),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClockConfig {
            min_samples: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClockConfig {
            max_dispersion: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: ClockConfig = serde_json::from_str(
            r#"{"servers": ["127.0.0.1:1123", "time.example"], "min_poll": 0, "recompute_interval": 0.5}"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].port(), 123);
        assert_eq!(config.min_poll, Poll(0));
        assert_eq!(config.recompute_interval, Duration::from_millis(500));
        // Unspecified fields keep their defaults
        assert_eq!(config.min_samples, super::super::MIN_SAMPLES_FOR_TRUST);
        assert!(config.validate().is_ok());

        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"127.0.0.1:1123\""));
    }
}
