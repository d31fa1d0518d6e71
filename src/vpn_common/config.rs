//! Configuration file and CLI layering for tcpvpn.

use crate::vpn_core::config::{
    VpnClientConfig, DEFAULT_OUTBOUND_QUEUE_SIZE, DEFAULT_PREFIX_LEN,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// `[client]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct ClientSection {
    pub server_addr: Option<String>,
    pub auth_key: Option<String>,
    pub auth_key_file: Option<PathBuf>,
    pub tun_name: Option<String>,
    pub tap: Option<bool>,
    pub prefix_len: Option<u8>,
    pub outbound_queue_size: Option<usize>,
}

/// `[discovery]` section.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct DiscoverySection {
    pub url: Option<String>,
    pub mandatory: Option<bool>,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct ClientConfigFile {
    pub client: Option<ClientSection>,
    pub discovery: Option<DiscoverySection>,
}

impl ClientConfigFile {
    pub fn client(&self) -> Option<&ClientSection> {
        self.client.as_ref()
    }

    pub fn discovery(&self) -> Option<&DiscoverySection> {
        self.discovery.as_ref()
    }
}

fn validate_prefix_len(prefix_len: u8) -> Result<()> {
    if !(1..=30).contains(&prefix_len) {
        anyhow::bail!(
            "prefix_len {} is out of range. Valid range: 1-30",
            prefix_len
        );
    }
    Ok(())
}

fn validate_queue_size(size: usize) -> Result<()> {
    if size == 0 {
        anyhow::bail!("outbound_queue_size must be at least 1");
    }
    Ok(())
}

fn validate_discovery_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .with_context(|| format!("Invalid discovery URL '{}'", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!(
            "Discovery URL '{}' must use http or https, not '{}'",
            url,
            parsed.scheme()
        );
    }
    Ok(())
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

fn parse_config(content: &str, path: &Path) -> Result<ClientConfigFile> {
    toml::from_str(content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn default_client_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("tcpvpn").join("client.toml"))
}

/// Load the client config file.
///
/// An explicit path must exist. Without one the default location is tried
/// and a missing file yields `None`.
pub fn load_client_config(path: Option<&Path>) -> Result<Option<ClientConfigFile>> {
    let config_path = match path {
        Some(p) => expand_tilde(p),
        None => match default_client_config_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(None),
        },
    };

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    log::debug!("Loaded config from {}", config_path.display());
    parse_config(&content, &config_path).map(Some)
}

/// Values given on the command line. `None`/`false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub server_addr: Option<String>,
    pub auth_key: Option<String>,
    pub auth_key_file: Option<PathBuf>,
    pub tun_name: Option<String>,
    pub tap: bool,
    pub prefix_len: Option<u8>,
    pub discovery_url: Option<String>,
    pub discovery_mandatory: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedClientConfig {
    pub server_addr: Option<String>,
    pub auth_key: Option<String>,
    pub auth_key_file: Option<PathBuf>,
    pub tun_name: Option<String>,
    pub tap: bool,
    pub prefix_len: u8,
    pub outbound_queue_size: usize,
    pub discovery_url: Option<String>,
    pub discovery_mandatory: bool,
}

impl ResolvedClientConfig {
    /// The shared key, inline or read from `auth_key_file`.
    pub fn read_auth_key(&self) -> Result<String> {
        if let Some(ref key) = self.auth_key {
            return Ok(key.clone());
        }
        let path = self
            .auth_key_file
            .as_deref()
            .map(expand_tilde)
            .context("No auth key configured")?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read auth key file: {}", path.display()))?;
        let key = content.trim();
        if key.is_empty() {
            anyhow::bail!("Auth key file {} is empty", path.display());
        }
        Ok(key.to_string())
    }

    /// Runtime settings for the tunnel client.
    pub fn to_client_config(&self) -> Result<VpnClientConfig> {
        let mut config = VpnClientConfig::new(self.read_auth_key()?);
        config.server_addr = self.server_addr.clone();
        config.prefix_len = self.prefix_len;
        config.outbound_queue_size = self.outbound_queue_size;
        config.validate().context("Invalid client configuration")?;
        Ok(config)
    }
}

#[derive(Default)]
pub struct ClientConfigBuilder {
    server_addr: Option<String>,
    auth_key: Option<String>,
    auth_key_file: Option<PathBuf>,
    tun_name: Option<String>,
    tap: Option<bool>,
    prefix_len: Option<u8>,
    outbound_queue_size: Option<usize>,
    discovery_url: Option<String>,
    discovery_mandatory: Option<bool>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_defaults(mut self) -> Self {
        self.tap = Some(false);
        self.prefix_len = Some(DEFAULT_PREFIX_LEN);
        self.outbound_queue_size = Some(DEFAULT_OUTBOUND_QUEUE_SIZE);
        self.discovery_mandatory = Some(false);
        self
    }

    pub fn apply_config(mut self, config: Option<&ClientConfigFile>) -> Self {
        let Some(config) = config else {
            return self;
        };

        if let Some(cfg) = config.client() {
            if cfg.server_addr.is_some() {
                self.server_addr = cfg.server_addr.clone();
            }
            if cfg.auth_key.is_some() {
                self.auth_key = cfg.auth_key.clone();
            }
            if cfg.auth_key_file.is_some() {
                self.auth_key_file = cfg.auth_key_file.clone();
            }
            if cfg.tun_name.is_some() {
                self.tun_name = cfg.tun_name.clone();
            }
            if cfg.tap.is_some() {
                self.tap = cfg.tap;
            }
            if cfg.prefix_len.is_some() {
                self.prefix_len = cfg.prefix_len;
            }
            if cfg.outbound_queue_size.is_some() {
                self.outbound_queue_size = cfg.outbound_queue_size;
            }
        }

        if let Some(cfg) = config.discovery() {
            if cfg.url.is_some() {
                self.discovery_url = cfg.url.clone();
            }
            if cfg.mandatory.is_some() {
                self.discovery_mandatory = cfg.mandatory;
            }
        }
        self
    }

    pub fn apply_cli(mut self, cli: ClientOverrides) -> Self {
        if cli.server_addr.is_some() {
            self.server_addr = cli.server_addr;
        }
        // A key on the command line replaces whichever source the file used.
        if cli.auth_key.is_some() {
            self.auth_key = cli.auth_key;
            self.auth_key_file = None;
        }
        if cli.auth_key_file.is_some() {
            self.auth_key_file = cli.auth_key_file;
            self.auth_key = None;
        }
        if cli.tun_name.is_some() {
            self.tun_name = cli.tun_name;
        }
        if cli.tap {
            self.tap = Some(true);
        }
        if cli.prefix_len.is_some() {
            self.prefix_len = cli.prefix_len;
        }
        if cli.discovery_url.is_some() {
            self.discovery_url = cli.discovery_url;
        }
        if cli.discovery_mandatory {
            self.discovery_mandatory = Some(true);
        }
        self
    }

    pub fn build(self) -> Result<ResolvedClientConfig> {
        match (&self.auth_key, &self.auth_key_file) {
            (Some(_), Some(_)) => anyhow::bail!(
                "Cannot specify both auth_key and auth_key_file. Use one source for auth."
            ),
            (None, None) => anyhow::bail!(
                "Auth key is required. Provide --key/--key-file or set auth_key in config."
            ),
            _ => {}
        }

        if self.server_addr.is_none() && self.discovery_url.is_none() {
            anyhow::bail!(
                "Server address is required. Provide --server or --discovery-url, or set one in config."
            );
        }

        if let Some(ref url) = self.discovery_url {
            validate_discovery_url(url)?;
        }

        let prefix_len = self.prefix_len.unwrap_or(DEFAULT_PREFIX_LEN);
        validate_prefix_len(prefix_len)?;

        let outbound_queue_size = self
            .outbound_queue_size
            .unwrap_or(DEFAULT_OUTBOUND_QUEUE_SIZE);
        validate_queue_size(outbound_queue_size)?;

        Ok(ResolvedClientConfig {
            server_addr: self.server_addr,
            auth_key: self.auth_key,
            auth_key_file: self.auth_key_file,
            tun_name: self.tun_name,
            tap: self.tap.unwrap_or(false),
            prefix_len,
            outbound_queue_size,
            discovery_url: self.discovery_url,
            discovery_mandatory: self.discovery_mandatory.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[client]
server_addr = "vpn.example.com:9090"
auth_key = "s3cret"
tun_name = "tcpvpn0"
prefix_len = 16

[discovery]
url = "https://registry.example.com/access"
mandatory = true
"#;

    fn sample() -> ClientConfigFile {
        parse_config(SAMPLE, Path::new("sample.toml")).unwrap()
    }

    fn resolve(
        config: Option<&ClientConfigFile>,
        cli: ClientOverrides,
    ) -> Result<ResolvedClientConfig> {
        ClientConfigBuilder::new()
            .apply_defaults()
            .apply_config(config)
            .apply_cli(cli)
            .build()
    }

    #[test]
    fn test_parse_full_config() {
        let config = sample();
        let client = config.client().unwrap();
        assert_eq!(client.server_addr.as_deref(), Some("vpn.example.com:9090"));
        assert_eq!(client.prefix_len, Some(16));
        assert_eq!(client.tap, None);
        assert_eq!(config.discovery().unwrap().mandatory, Some(true));
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let result = parse_config("[client]\nprefix_len = \"wide\"\n", Path::new("bad.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_values_over_defaults() {
        let resolved = resolve(Some(&sample()), ClientOverrides::default()).unwrap();
        assert_eq!(resolved.prefix_len, 16);
        assert_eq!(resolved.outbound_queue_size, DEFAULT_OUTBOUND_QUEUE_SIZE);
        assert!(!resolved.tap);
        assert!(resolved.discovery_mandatory);
        assert_eq!(resolved.tun_name.as_deref(), Some("tcpvpn0"));
    }

    #[test]
    fn test_cli_over_file() {
        let cli = ClientOverrides {
            server_addr: Some("10.0.0.1:9090".to_string()),
            auth_key_file: Some(PathBuf::from("/etc/tcpvpn/key")),
            tap: true,
            prefix_len: Some(20),
            ..Default::default()
        };
        let resolved = resolve(Some(&sample()), cli).unwrap();
        assert_eq!(resolved.server_addr.as_deref(), Some("10.0.0.1:9090"));
        assert_eq!(resolved.auth_key, None);
        assert_eq!(
            resolved.auth_key_file.as_deref(),
            Some(Path::new("/etc/tcpvpn/key"))
        );
        assert!(resolved.tap);
        assert_eq!(resolved.prefix_len, 20);
    }

    #[test]
    fn test_cli_only() {
        let cli = ClientOverrides {
            server_addr: Some("127.0.0.1:9090".to_string()),
            auth_key: Some("k".to_string()),
            ..Default::default()
        };
        let resolved = resolve(None, cli).unwrap();
        assert_eq!(resolved.prefix_len, DEFAULT_PREFIX_LEN);
        assert_eq!(resolved.discovery_url, None);
        assert!(!resolved.discovery_mandatory);
    }

    #[test]
    fn test_requires_key() {
        let cli = ClientOverrides {
            server_addr: Some("127.0.0.1:9090".to_string()),
            ..Default::default()
        };
        let err = resolve(None, cli).unwrap_err();
        assert!(err.to_string().contains("Auth key is required"));
    }

    #[test]
    fn test_rejects_both_key_sources() {
        let config = parse_config(
            "[client]\nserver_addr = \"a:1\"\nauth_key = \"k\"\nauth_key_file = \"/k\"\n",
            Path::new("both.toml"),
        )
        .unwrap();
        let err = resolve(Some(&config), ClientOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("both auth_key and auth_key_file"));
    }

    #[test]
    fn test_requires_server_or_discovery() {
        let cli = ClientOverrides {
            auth_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(resolve(None, cli.clone()).is_err());

        let cli = ClientOverrides {
            discovery_url: Some("http://registry.local/access".to_string()),
            ..cli
        };
        let resolved = resolve(None, cli).unwrap();
        assert_eq!(resolved.server_addr, None);
    }

    #[test]
    fn test_rejects_bad_discovery_url() {
        for url in ["not a url", "ftp://registry.local/access"] {
            let cli = ClientOverrides {
                auth_key: Some("k".to_string()),
                discovery_url: Some(url.to_string()),
                ..Default::default()
            };
            assert!(resolve(None, cli).is_err(), "accepted {}", url);
        }
    }

    #[test]
    fn test_rejects_bad_prefix_and_queue() {
        let cli = ClientOverrides {
            server_addr: Some("a:1".to_string()),
            auth_key: Some("k".to_string()),
            prefix_len: Some(31),
            ..Default::default()
        };
        assert!(resolve(None, cli).is_err());

        let config = parse_config(
            "[client]\nserver_addr = \"a:1\"\nauth_key = \"k\"\noutbound_queue_size = 0\n",
            Path::new("queue.toml"),
        )
        .unwrap();
        assert!(resolve(Some(&config), ClientOverrides::default()).is_err());
    }

    #[test]
    fn test_key_file_is_trimmed() {
        let path = std::env::temp_dir().join(format!("tcpvpn-key-{}", std::process::id()));
        std::fs::write(&path, "from-file\n").unwrap();

        let cli = ClientOverrides {
            server_addr: Some("127.0.0.1:9090".to_string()),
            auth_key_file: Some(path.clone()),
            ..Default::default()
        };
        let resolved = resolve(None, cli).unwrap();
        let config = resolved.to_client_config().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.auth_key, "from-file");
        assert_eq!(config.server_addr.as_deref(), Some("127.0.0.1:9090"));
        assert_eq!(config.prefix_len, DEFAULT_PREFIX_LEN);
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let path = Path::new("/nonexistent/tcpvpn/client.toml");
        assert!(load_client_config(Some(path)).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/etc/tcpvpn/client.toml");
        assert_eq!(expand_tilde(plain), plain);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/key")), home.join("key"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
    }
}
