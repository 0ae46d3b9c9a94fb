//! Environment-driven settings consumed at driver-registration time.
//!
//! Detection behavior depends on these variables, so they are resolved
//! once into a `Settings` value and threaded through `driver_init` calls.
//! File-based configuration belongs to the embedding application.

use std::env;

/// Default base port for the NWA detection sweep.
pub const NWA_DEFAULT_PORT: u16 = 0xBEEF;

/// Legacy NWA port range still swept unless disabled.
pub const NWA_OLD_PORT: u16 = 65400;

/// Default listen address for the luabridge accept loop.
pub const LUABRIDGE_DEFAULT_LISTEN: &str = "127.0.0.1:65398";

/// Settings resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub fxpakpro_disable: bool,
    pub emunw_disable: bool,
    pub emunw_detect_log: bool,
    /// Base port for the NWA sweep (`nwa_port_range`, `0x` prefix accepted).
    pub nwa_port_range: u16,
    pub nwa_disable_old_range: bool,
    /// Comma-delimited `host:port` list overriding the default sweep.
    pub emunw_hosts: Option<String>,
    pub luabridge_disable: bool,
    pub luabridge_listen: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            fxpakpro_disable: false,
            emunw_disable: false,
            emunw_detect_log: false,
            nwa_port_range: NWA_DEFAULT_PORT,
            nwa_disable_old_range: false,
            emunw_hosts: None,
            luabridge_disable: false,
            luabridge_listen: LUABRIDGE_DEFAULT_LISTEN.to_string(),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        let nwa_port_range = match env::var("nwa_port_range") {
            Ok(s) if !s.is_empty() => parse_port(&s).unwrap_or_else(|| {
                log::warn!(
                    "unable to parse nwa_port_range '{}', using default of 0x{:x}",
                    s,
                    NWA_DEFAULT_PORT
                );
                NWA_DEFAULT_PORT
            }),
            _ => NWA_DEFAULT_PORT,
        };

        Self {
            debug: env_bool("debug"),
            fxpakpro_disable: env_bool("fxpakpro_disable"),
            emunw_disable: env_bool("emunw_disable"),
            emunw_detect_log: env_bool("emunw_detect_log"),
            nwa_port_range,
            nwa_disable_old_range: env_bool("nwa_disable_old_range"),
            emunw_hosts: env::var("emunw_hosts").ok().filter(|s| !s.is_empty()),
            luabridge_disable: env_bool("luabridge_disable"),
            luabridge_listen: env::var("luabridge_listen")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| LUABRIDGE_DEFAULT_LISTEN.to_string()),
        }
    }

    /// The NWA host sweep: an explicit `emunw_hosts` list wins; otherwise
    /// ten ports from the configured base plus the legacy 65400 range,
    /// skipping whichever half would duplicate or is disabled.
    pub fn nwa_hosts(&self) -> Vec<String> {
        if let Some(hosts) = &self.emunw_hosts {
            return hosts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        const COUNT: u16 = 10;
        let mut hosts = Vec::with_capacity(2 * COUNT as usize);
        if self.nwa_disable_old_range || self.nwa_port_range != NWA_OLD_PORT {
            for i in 0..COUNT {
                hosts.push(format!("localhost:{}", self.nwa_port_range + i));
            }
        }
        if !self.nwa_disable_old_range {
            for i in 0..COUNT {
                hosts.push(format!("localhost:{}", NWA_OLD_PORT + i));
            }
        }
        hosts
    }
}

/// Accept `0x`-prefixed hex or decimal port numbers.
fn parse_port(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn env_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sweep_covers_both_ranges() {
        let settings = Settings::default();
        let hosts = settings.nwa_hosts();
        assert_eq!(hosts.len(), 20);
        assert_eq!(hosts[0], "localhost:48879"); // 0xBEEF
        assert_eq!(hosts[9], "localhost:48888");
        assert_eq!(hosts[10], "localhost:65400");
        assert_eq!(hosts[19], "localhost:65409");
    }

    #[test]
    fn old_range_disabled_drops_legacy_ports() {
        let settings = Settings {
            nwa_disable_old_range: true,
            ..Settings::default()
        };
        let hosts = settings.nwa_hosts();
        assert_eq!(hosts.len(), 10);
        assert!(hosts.iter().all(|h| !h.contains("65400")));
    }

    #[test]
    fn base_equal_to_old_range_is_not_doubled() {
        let settings = Settings {
            nwa_port_range: NWA_OLD_PORT,
            ..Settings::default()
        };
        let hosts = settings.nwa_hosts();
        assert_eq!(hosts.len(), 10);
        assert_eq!(hosts[0], "localhost:65400");
    }

    #[test]
    fn explicit_host_list_wins() {
        let settings = Settings {
            emunw_hosts: Some("10.0.0.5:9000, 10.0.0.6:9001".to_string()),
            ..Settings::default()
        };
        assert_eq!(
            settings.nwa_hosts(),
            vec!["10.0.0.5:9000".to_string(), "10.0.0.6:9001".to_string()]
        );
    }

    #[test]
    fn port_parsing_accepts_hex_and_decimal() {
        assert_eq!(parse_port("0xbeef"), Some(0xBEEF));
        assert_eq!(parse_port("0XBEEF"), Some(0xBEEF));
        assert_eq!(parse_port("65400"), Some(65400));
        assert_eq!(parse_port("not-a-port"), None);
    }
}
