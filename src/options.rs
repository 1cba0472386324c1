use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use regex::Regex;

use rs_saml::auth::DEFAULT_MAX_ROUNDS;

pub const DEFAULT_PORT: u16 = 27017;

pub struct ClientOptions {
    pub host: String,
    pub port: u16,

    /// Domain the identity provider is configured for.
    pub username: String,

    pub tls: bool,
    pub tls_ca_file: Option<PathBuf>,

    pub connect_timeout: Duration,
    pub max_sasl_rounds: usize,
}

impl ClientOptions {
    pub fn new() -> Self {
        ClientOptions {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            tls: false,
            tls_ca_file: None,
            connect_timeout: Duration::from_secs(10),
            max_sasl_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Reads `mongodb://<domain>@<host>[:<port>][/][?<options>]`.
    pub fn parse(uri: &str) -> Result<Self> {
        let re = Regex::new(
            r"^mongodb://(?:(?P<user>.+)@)?(?P<host>[^@:/?]+)(?::(?P<port>\d+))?/?(?:\?(?P<query>.*))?$",
        )?;
        let caps = re
            .captures(uri)
            .ok_or_else(|| anyhow!("Malformed connection string: {}", uri))?;

        let mut opts = ClientOptions::new();
        opts.host = caps["host"].to_string();

        match caps.name("user") {
            Some(user) => opts.username = user.as_str().to_string(),
            None => bail!("Connection string has no user to sign in as"),
        }

        if let Some(port) = caps.name("port") {
            opts.port = port
                .as_str()
                .parse()
                .map_err(|_| anyhow!("Invalid port: {}", port.as_str()))?;
        }

        if let Some(query) = caps.name("query") {
            for (key, value) in parse_query(query.as_str())? {
                match key.as_str() {
                    "tls" | "ssl" => opts.tls = parse_bool(&key, &value)?,
                    "tlsCAFile" => {
                        opts.tls = true;
                        opts.tls_ca_file = Some(PathBuf::from(value));
                    }
                    "connectTimeoutMS" => {
                        let ms = value
                            .parse::<u64>()
                            .map_err(|_| anyhow!("Unable to parse connectTimeoutMS as an integer"))?;
                        opts.connect_timeout = Duration::from_millis(ms);
                    }
                    "maxSaslRounds" => {
                        opts.max_sasl_rounds = value
                            .parse()
                            .map_err(|_| anyhow!("Unable to parse maxSaslRounds as an integer"))?;
                    }
                    "authMechanism" => {
                        if value != rs_saml::sasl::SAML20 {
                            bail!("Unsupported authentication mechanism: {}", value);
                        }
                    }
                    _ => bail!("Unknown connection option: {}", key),
                }
            }
        }

        Ok(opts)
    }
}

fn parse_query(query: &str) -> Result<HashMap<String, String>> {
    let mut args = HashMap::new();

    for arg in query.split('&') {
        if arg.is_empty() {
            continue;
        }

        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_string(), value.to_string());
            }
            _ => bail!("Failed to parse connection option: {}", arg),
        }
    }

    Ok(args)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("{} must be true or false", key),
    }
}
