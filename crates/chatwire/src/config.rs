//! Process configuration.
//!
//! Built once at startup from the environment and command-line flags, then
//! passed by reference to telemetry and transport setup. Protocol code never
//! reads the environment.

use crate::driver::DEFAULT_TERMINATE_TOKEN;
use crate::trace::Role;

pub const DEFAULT_PORT: u16 = 50051;

/// Security mode for outbound connections to the trace collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    Insecure,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub role: Role,
    /// Reported as the `service.name` resource attribute.
    pub service_name: String,
    /// OTLP/gRPC collector. No spans are exported when unset.
    pub collector_endpoint: Option<String>,
    pub security: TransportSecurity,
    /// Listen address (server) or dial address (client).
    pub addr: String,
    pub terminate_token: String,
    /// Full filter directive; takes precedence over `log_level`.
    pub log_filter: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("help requested")]
    HelpRequested,
}

impl ChatConfig {
    pub fn defaults(role: Role) -> Self {
        let (service_name, addr) = match role {
            Role::Server => ("ChatService", format!("0.0.0.0:{DEFAULT_PORT}")),
            Role::Client => ("ChatClient", format!("127.0.0.1:{DEFAULT_PORT}")),
        };

        Self {
            role,
            service_name: service_name.to_string(),
            collector_endpoint: None,
            security: TransportSecurity::Tls,
            addr,
            terminate_token: DEFAULT_TERMINATE_TOKEN.to_string(),
            log_filter: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }

    pub fn from_env(role: Role) -> Self {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(role: Role, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::defaults(role);

        if let Some(name) = get("SERVICE_NAME") {
            config.service_name = name;
        }
        config.collector_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");
        if let Some(insecure) = get("INSECURE_MODE") {
            config.security = if is_truthy(&insecure) {
                TransportSecurity::Insecure
            } else {
                TransportSecurity::Tls
            };
        }
        if let Some(addr) = get("CHAT_ADDR") {
            config.addr = addr;
        }
        config.log_filter = get("RUST_LOG");
        config.log_level = match get("CHAT_LOG").as_deref() {
            Some("debug") => "debug",
            Some("trace") => "trace",
            Some("warn") | Some("warning") => "warn",
            Some("error") => "error",
            _ => "info",
        }
        .to_string();
        if get("LOG_FORMAT").as_deref() == Some("json") {
            config.log_format = LogFormat::Json;
        }

        config
    }

    /// Apply command-line flags (without argv[0]) on top of this config.
    pub fn apply_args(mut self, args: &[String]) -> Result<Self, ConfigError> {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };

            match arg.as_str() {
                "--addr" => self.addr = value("--addr")?,
                "--name" => self.service_name = value("--name")?,
                "--endpoint" => self.collector_endpoint = Some(value("--endpoint")?),
                "--terminate" => self.terminate_token = value("--terminate")?,
                "--insecure" => self.security = TransportSecurity::Insecure,
                "--tls" => self.security = TransportSecurity::Tls,
                "--json-logs" => self.log_format = LogFormat::Json,
                "--help" | "-h" => return Err(ConfigError::HelpRequested),
                flag if flag.starts_with('-') => {
                    return Err(ConfigError::UnknownFlag(flag.to_string()));
                }
                other => return Err(ConfigError::UnexpectedArgument(other.to_string())),
            }
        }
        Ok(self)
    }

    /// Filter directive for the log subscriber.
    pub fn log_directive(&self) -> String {
        match self.log_filter {
            Some(ref filter) => filter.clone(),
            None => format!("chatwire={level},chat_server={level},chat_client={level}", level = self.log_level),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn usage(role: Role) -> String {
    let (bin, addr_help, extra) = match role {
        Role::Server => ("chat-server", "Listen address", ""),
        Role::Client => (
            "chat-client",
            "Server address",
            "  --terminate <text>   Input line that ends the chat [default: exit]\n",
        ),
    };
    format!(
        "Usage: {bin} [options]\n\
         \n\
         Options:\n\
         \x20 --addr <host:port>   {addr_help}\n\
         \x20 --name <service>     Service name reported to the trace collector\n\
         \x20 --endpoint <url>     OTLP collector endpoint\n\
         \x20 --insecure           Plaintext connection to the collector\n\
         \x20 --tls                TLS connection to the collector [default]\n\
         \x20 --json-logs          Log as JSON\n\
         {extra}"
    )
}
