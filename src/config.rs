//! Configuration loading and validation.
//!
//! The config file is YAML (`web-jockey.yaml` by default). Its raw shape is
//! [`ConfigFile`]; [`GatewayConfig`] is the validated form the rest of the
//! gateway consumes. Validation happens once at load time: malformed
//! entries are rejected with a descriptive error instead of failing lazily
//! per request.
//!
//! Route registration order follows document order, so the `launch`,
//! `static`, and `dynamic` sections deserialize into ordered
//! `Vec<(String, _)>` pairs rather than hash maps.

use anyhow::Context;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// One child process to launch at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubprocessSpec {
    /// Program to run.
    pub command: String,

    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, relative to the gateway's working directory.
    /// Defaults to the gateway's working directory itself.
    pub cwd: Option<String>,
}

/// Where a mounted prefix sends its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Serve files from a local directory tree.
    Static { local_root: PathBuf },
    /// Forward requests to an upstream HTTP service.
    Dynamic { upstream_base: String },
}

/// Raw shape of the YAML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Listening port (default: 80).
    pub port: Option<u16>,

    /// Logging directory (optional).
    pub log: Option<String>,

    /// Child processes to launch, name -> spec.
    #[serde(default, deserialize_with = "ordered_map")]
    pub launch: Vec<(String, SubprocessSpec)>,

    /// Static routes, mount prefix -> local directory.
    #[serde(default, rename = "static", deserialize_with = "ordered_map")]
    pub static_routes: Vec<(String, String)>,

    /// Dynamic routes, mount prefix -> upstream base URL.
    #[serde(default, rename = "dynamic", deserialize_with = "ordered_map")]
    pub dynamic_routes: Vec<(String, String)>,
}

/// Deserialize a YAML mapping into key/value pairs, preserving document
/// order.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedMapVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
}

/// A single invalid configuration entry.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("route prefix {0:?} must start with '/'")]
    BadPrefix(String),
    #[error("duplicate {table} route prefix {prefix:?}")]
    DuplicatePrefix { table: &'static str, prefix: String },
    #[error("upstream URL {url:?} for prefix {prefix:?} is not a valid http URL")]
    BadUpstream { prefix: String, url: String },
    #[error("subprocess {0:?} has an empty command")]
    EmptyCommand(String),
    #[error("duplicate subprocess name {0:?}")]
    DuplicateSubprocess(String),
}

/// The validated configuration consumed by the gateway. Immutable after
/// startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listening port.
    pub port: u16,

    /// Global working directory; relative paths in the config resolve
    /// against it.
    pub working_dir: PathBuf,

    /// Logging directory, if file logging is enabled.
    pub log_dir: Option<PathBuf>,

    /// Static routes in registration order, prefix -> resolved local root.
    pub static_routes: Vec<(String, PathBuf)>,

    /// Dynamic routes in registration order, prefix -> upstream base URL.
    pub dynamic_routes: Vec<(String, String)>,

    /// Subprocesses to launch at startup, in document order.
    pub subprocesses: Vec<(String, SubprocessSpec)>,
}

const DEFAULT_PORT: u16 = 80;

impl GatewayConfig {
    /// Read, parse, and validate a config file.
    pub fn load(path: &Path, working_dir: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read file {}", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Unable to parse YAML {}", path.display()))?;
        Self::from_file(file, working_dir)
    }

    /// Validate a parsed config file and resolve paths against the working
    /// directory.
    pub fn from_file(file: ConfigFile, working_dir: &Path) -> anyhow::Result<Self> {
        let mut errors: Vec<String> = Vec::new();

        let mut seen = HashSet::new();
        let mut static_routes = Vec::with_capacity(file.static_routes.len());
        for (prefix, local) in file.static_routes {
            match normalize_prefix(&prefix) {
                Ok(prefix) => {
                    if !seen.insert(prefix.clone()) {
                        errors.push(
                            ConfigError::DuplicatePrefix {
                                table: "static",
                                prefix,
                            }
                            .to_string(),
                        );
                        continue;
                    }
                    static_routes.push((prefix, working_dir.join(local)));
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        let mut seen = HashSet::new();
        let mut dynamic_routes = Vec::with_capacity(file.dynamic_routes.len());
        for (prefix, upstream) in file.dynamic_routes {
            match normalize_prefix(&prefix) {
                Ok(prefix) => {
                    if !seen.insert(prefix.clone()) {
                        errors.push(
                            ConfigError::DuplicatePrefix {
                                table: "dynamic",
                                prefix,
                            }
                            .to_string(),
                        );
                        continue;
                    }
                    if !is_http_base(&upstream) {
                        errors.push(
                            ConfigError::BadUpstream {
                                prefix,
                                url: upstream,
                            }
                            .to_string(),
                        );
                        continue;
                    }
                    dynamic_routes.push((prefix, upstream.trim_end_matches('/').to_string()));
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        let mut seen = HashSet::new();
        for (name, spec) in &file.launch {
            if spec.command.trim().is_empty() {
                errors.push(ConfigError::EmptyCommand(name.clone()).to_string());
            }
            if !seen.insert(name.clone()) {
                errors.push(ConfigError::DuplicateSubprocess(name.clone()).to_string());
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(Self {
            port: file.port.unwrap_or(DEFAULT_PORT),
            working_dir: working_dir.to_path_buf(),
            log_dir: file.log.map(|dir| working_dir.join(dir)),
            static_routes,
            dynamic_routes,
            subprocesses: file.launch,
        })
    }

    /// All routes in registration order: the static table first, then the
    /// dynamic table.
    pub fn routes(&self) -> impl Iterator<Item = (&str, RouteTarget)> + '_ {
        let statics = self.static_routes.iter().map(|(prefix, root)| {
            (
                prefix.as_str(),
                RouteTarget::Static {
                    local_root: root.clone(),
                },
            )
        });
        let dynamics = self.dynamic_routes.iter().map(|(prefix, base)| {
            (
                prefix.as_str(),
                RouteTarget::Dynamic {
                    upstream_base: base.clone(),
                },
            )
        });
        statics.chain(dynamics)
    }

    /// Apply a command-line port override.
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Apply a command-line log-directory override.
    pub fn with_log_override(mut self, log_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = log_dir {
            self.log_dir = Some(dir);
        }
        self
    }
}

/// Require an absolute prefix and trim any trailing slash so that `/app`
/// and `/app/` register the same mount.
fn normalize_prefix(prefix: &str) -> Result<String, ConfigError> {
    if !prefix.starts_with('/') {
        return Err(ConfigError::BadPrefix(prefix.to_string()));
    }
    if prefix == "/" {
        return Ok(prefix.to_string());
    }
    Ok(prefix.trim_end_matches('/').to_string())
}

/// An upstream base must be an absolute http URL.
fn is_http_base(url: &str) -> bool {
    match url.parse::<hyper::Uri>() {
        Ok(uri) => uri.scheme_str() == Some("http") && uri.authority().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ConfigFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let file = parse(
            r#"
port: 8080
log: logs
launch:
  worker:
    command: node
    args: [server.js]
    cwd: apps/worker
  helper:
    command: echo
    args: ["hi"]
static:
  /: public
  /docs: docs/html
dynamic:
  /api: http://127.0.0.1:3000
"#,
        );

        let config = GatewayConfig::from_file(file, Path::new("/srv")).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_dir, Some(PathBuf::from("/srv/logs")));
        assert_eq!(config.subprocesses.len(), 2);
        assert_eq!(config.subprocesses[0].0, "worker");
        assert_eq!(config.subprocesses[1].0, "helper");
        assert_eq!(
            config.static_routes,
            vec![
                ("/".to_string(), PathBuf::from("/srv/public")),
                ("/docs".to_string(), PathBuf::from("/srv/docs/html")),
            ]
        );
        assert_eq!(
            config.dynamic_routes,
            vec![("/api".to_string(), "http://127.0.0.1:3000".to_string())]
        );
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = GatewayConfig::from_file(parse("{}"), Path::new(".")).unwrap();
        assert_eq!(config.port, 80);
        assert!(config.log_dir.is_none());
        assert!(config.static_routes.is_empty());
        assert!(config.dynamic_routes.is_empty());
        assert!(config.subprocesses.is_empty());
    }

    #[test]
    fn test_section_order_is_preserved() {
        let file = parse(
            r#"
dynamic:
  /zeta: http://127.0.0.1:1
  /alpha: http://127.0.0.1:2
  /mid: http://127.0.0.1:3
"#,
        );
        let prefixes: Vec<&str> = file
            .dynamic_routes
            .iter()
            .map(|(p, _)| p.as_str())
            .collect();
        assert_eq!(prefixes, vec!["/zeta", "/alpha", "/mid"]);
    }

    #[test]
    fn test_rejects_relative_prefix() {
        let file = parse("static:\n  docs: docs\n");
        let err = GatewayConfig::from_file(file, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_rejects_bad_upstream_url() {
        let file = parse("dynamic:\n  /api: not-a-url\n");
        let err = GatewayConfig::from_file(file, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("not a valid http URL"));
    }

    #[test]
    fn test_rejects_https_upstream() {
        // TLS termination is out of scope; upstreams are plain http.
        let file = parse("dynamic:\n  /api: https://example.com\n");
        assert!(GatewayConfig::from_file(file, Path::new(".")).is_err());
    }

    #[test]
    fn test_rejects_empty_command() {
        let file = parse("launch:\n  broken:\n    command: \"\"\n");
        let err = GatewayConfig::from_file(file, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn test_collects_all_errors_at_once() {
        let file = parse(
            "static:\n  bad: x\ndynamic:\n  also-bad: http://127.0.0.1:1\nlaunch:\n  p:\n    command: \"\"\n",
        );
        let err = GatewayConfig::from_file(file, Path::new(".")).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("bad"));
        assert!(text.contains("also-bad"));
        assert!(text.contains("empty command"));
    }

    #[test]
    fn test_trailing_slash_prefix_normalized() {
        let file = parse("static:\n  /docs/: docs\n");
        let config = GatewayConfig::from_file(file, Path::new(".")).unwrap();
        assert_eq!(config.static_routes[0].0, "/docs");
    }

    #[test]
    fn test_upstream_trailing_slash_trimmed() {
        let file = parse("dynamic:\n  /api: http://127.0.0.1:3000/\n");
        let config = GatewayConfig::from_file(file, Path::new(".")).unwrap();
        assert_eq!(config.dynamic_routes[0].1, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_cli_overrides() {
        let config = GatewayConfig::from_file(parse("port: 8080"), Path::new("."))
            .unwrap()
            .with_port_override(Some(9090))
            .with_log_override(Some(PathBuf::from("/var/log/jockey")));
        assert_eq!(config.port, 9090);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/jockey")));
    }
}
