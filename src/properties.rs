use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use toml::value::Table;
use toml::Value;

use crate::voltdb::{ClientConfig, DEFAULT_PORT};

/// Keys whose override values stay strings even when they look numeric.
const STRING_PROPERTIES: &[&str] = &[
    "table",
    "requestdistribution",
    "insertorder",
    "voltdb.servers",
    "voltdb.user",
    "voltdb.password",
];

#[derive(Deserialize, Clone, Debug)]
pub struct Properties {
    #[serde(rename = "recordcount", default = "default_record_count")]
    pub record_count: u64,

    #[serde(rename = "operationcount", default = "default_operation_count")]
    pub operation_count: u64,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(rename = "fieldcount", default = "default_field_count")]
    pub field_count: u64,

    #[serde(rename = "fieldlength", default = "default_field_length")]
    pub field_length: u64,

    #[serde(rename = "readproportion", default = "default_read_proportion")]
    pub read_proportion: f64,

    #[serde(rename = "updateproportion", default = "default_update_proportion")]
    pub update_proportion: f64,

    #[serde(rename = "insertproportion", default)]
    pub insert_proportion: f64,

    #[serde(rename = "scanproportion", default)]
    pub scan_proportion: f64,

    #[serde(rename = "deleteproportion", default)]
    pub delete_proportion: f64,

    #[serde(
        rename = "requestdistribution",
        default = "default_request_distribution"
    )]
    pub request_distribution: String,

    #[serde(rename = "maxscanlength", default = "default_max_scan_length")]
    pub max_scan_length: u64,

    #[serde(rename = "insertorder", default = "default_insert_order")]
    pub insert_order: String,

    #[serde(rename = "zeropadding", default = "default_zero_padding")]
    pub zero_padding: usize,

    #[serde(default)]
    pub voltdb: VoltDbProperties,
}

/// Settings read from the `[voltdb]` table.
#[derive(Deserialize, Clone, Debug)]
pub struct VoltDbProperties {
    /// Comma separated `host[:port]` list.
    #[serde(default = "default_servers")]
    pub servers: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Outbound transactions per second; zero disables the cap.
    #[serde(rename = "ratelimit", default = "default_rate_limit")]
    pub rate_limit: u32,
}

impl Default for VoltDbProperties {
    fn default() -> Self {
        VoltDbProperties {
            servers: default_servers(),
            user: String::new(),
            password: String::new(),
            rate_limit: default_rate_limit(),
        }
    }
}

impl VoltDbProperties {
    pub fn client_config(&self) -> Result<ClientConfig> {
        let servers = self
            .servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(server_address)
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            bail!("voltdb.servers lists no hosts");
        }
        Ok(ClientConfig {
            servers,
            user: self.user.clone(),
            password: self.password.clone(),
            max_transactions_per_second: self.rate_limit,
        })
    }
}

/// Normalizes `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6
/// address into a connectable `host:port`.
fn server_address(server: &str) -> Result<String> {
    let (host, port) = if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unclosed '[' in voltdb server '{}'", server))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => bail!("unexpected '{}' after ']' in voltdb server '{}'", tail, server),
            },
        }
    } else if server.matches(':').count() > 1 {
        (server, None)
    } else {
        match server.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (server, None),
        }
    };
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("invalid port in voltdb server '{}'", server))?,
        None => DEFAULT_PORT,
    };
    if host.contains(':') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

impl Properties {
    /// Reads an optional TOML workload file and applies `key=value` overrides on top.
    pub fn load(path: Option<&str>, overrides: &[String]) -> Result<Properties> {
        let mut table = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read workload file {}", path))?;
                toml::from_str::<Table>(&raw)
                    .with_context(|| format!("failed to parse workload file {}", path))?
            }
            None => Table::new(),
        };
        for kv in overrides {
            let (k, v) = kv
                .split_once('=')
                .ok_or_else(|| anyhow!("property override '{}' is not key=value", kv))?;
            let (k, v) = (k.trim(), v.trim());
            let value = if STRING_PROPERTIES.contains(&k) {
                Value::from(v)
            } else {
                parse_value(v)
            };
            set_property(&mut table, k, value)?;
        }
        let props: Properties = Value::Table(table).try_into()?;
        props.validate()?;
        Ok(props)
    }

    fn validate(&self) -> Result<()> {
        let total = self.read_proportion
            + self.update_proportion
            + self.insert_proportion
            + self.scan_proportion
            + self.delete_proportion;
        if total <= 0.0 {
            bail!("operation proportions sum to zero");
        }
        if self.max_scan_length == 0 {
            bail!("maxscanlength must be positive");
        }
        Ok(())
    }
}

fn set_property(table: &mut Table, key: &str, value: Value) -> Result<()> {
    match key.split_once('.') {
        Some((head, rest)) => {
            if !table.contains_key(head) {
                table.insert(head.to_string(), Value::Table(Table::new()));
            }
            match table.get_mut(head) {
                Some(Value::Table(nested)) => set_property(nested, rest, value),
                _ => Err(anyhow!("property '{}' is not a table", head)),
            }
        }
        None => {
            table.insert(key.to_string(), value);
            Ok(())
        }
    }
}

fn parse_value(v: &str) -> Value {
    if let Ok(i) = v.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = v.parse::<f64>() {
        Value::from(f)
    } else if let Ok(b) = v.to_ascii_lowercase().parse::<bool>() {
        Value::from(b)
    } else {
        Value::from(v)
    }
}

fn default_record_count() -> u64 {
    1000
}
fn default_operation_count() -> u64 {
    1000
}
fn default_table() -> String {
    "usertable".to_string()
}
fn default_field_count() -> u64 {
    10
}
fn default_field_length() -> u64 {
    100
}
fn default_read_proportion() -> f64 {
    0.95
}
fn default_update_proportion() -> f64 {
    0.05
}
fn default_request_distribution() -> String {
    "uniform".to_string()
}
fn default_max_scan_length() -> u64 {
    100
}
fn default_insert_order() -> String {
    "hashed".to_string()
}
fn default_zero_padding() -> usize {
    1
}
fn default_servers() -> String {
    "localhost".to_string()
}
fn default_rate_limit() -> u32 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_workload() {
        let props = Properties::load(None, &[]).unwrap();
        assert_eq!(props.table, "usertable");
        assert_eq!(props.field_count, 10);
        assert_eq!(props.read_proportion, 0.95);
        assert_eq!(props.voltdb.rate_limit, 2000);

        let config = props.voltdb.client_config().unwrap();
        assert_eq!(config.servers, vec!["localhost:21212".to_string()]);
        assert_eq!(config.max_transactions_per_second, 2000);
    }

    #[test]
    fn overrides_reach_nested_tables() {
        let overrides = vec![
            "recordcount=50".to_string(),
            "requestdistribution=zipfian".to_string(),
            "voltdb.servers=db1, db2:31212".to_string(),
            "voltdb.ratelimit=0".to_string(),
        ];
        let props = Properties::load(None, &overrides).unwrap();
        assert_eq!(props.record_count, 50);
        assert_eq!(props.request_distribution, "zipfian");
        assert_eq!(props.voltdb.rate_limit, 0);

        let config = props.voltdb.client_config().unwrap();
        assert_eq!(
            config.servers,
            vec!["db1:21212".to_string(), "db2:31212".to_string()]
        );
    }

    #[test]
    fn numeric_looking_strings_stay_strings() {
        let overrides = vec![
            "voltdb.password=123456".to_string(),
            "voltdb.user=42".to_string(),
            "table=2024".to_string(),
        ];
        let props = Properties::load(None, &overrides).unwrap();
        assert_eq!(props.voltdb.password, "123456");
        assert_eq!(props.voltdb.user, "42");
        assert_eq!(props.table, "2024");
        assert_eq!(props.voltdb.client_config().unwrap().password, "123456");
    }

    #[test]
    fn ipv6_servers_keep_their_colons() {
        let mut voltdb = VoltDbProperties::default();
        voltdb.servers = "::1, [fe80::2]:31212, [::3], 10.0.0.4:5".to_string();
        let config = voltdb.client_config().unwrap();
        assert_eq!(
            config.servers,
            vec![
                "[::1]:21212".to_string(),
                "[fe80::2]:31212".to_string(),
                "[::3]:21212".to_string(),
                "10.0.0.4:5".to_string(),
            ]
        );

        voltdb.servers = "[::1".to_string();
        assert!(voltdb.client_config().is_err());
        voltdb.servers = "[::1]x".to_string();
        assert!(voltdb.client_config().is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Properties::load(None, &["recordcount".to_string()]).is_err());
        let no_ops = vec![
            "readproportion=0".to_string(),
            "updateproportion=0".to_string(),
        ];
        assert!(Properties::load(None, &no_ops).is_err());

        let mut voltdb = VoltDbProperties::default();
        voltdb.servers = "db1:notaport".to_string();
        assert!(voltdb.client_config().is_err());
        voltdb.servers = " , ".to_string();
        assert!(voltdb.client_config().is_err());
    }
}
