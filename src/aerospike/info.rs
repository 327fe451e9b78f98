//! Minimal client for the Aerospike info protocol.
//!
//! Only read-only commands are issued: `build` to learn the running server
//! version and `statistics` for cluster size and migration progress.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use super::SERVICE_PORT;

const PROTOCOL_VERSION: u8 = 2;
const INFO_MESSAGE_TYPE: u8 = 1;
const HEADER_LEN: usize = 8;
/// Upper bound on an info response body, far above any statistics payload
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum InfoError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("info request timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("field {0:?} missing from info response")]
    MissingField(String),

    #[error("field {field:?} has invalid value {value:?}")]
    InvalidValue { field: String, value: String },
}

/// Parse a `key=value;key=value` info value. Keys and values are trimmed and
/// empty segments are skipped.
pub fn parse_pairs(value: &str) -> BTreeMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

fn stat_u64(stats: &BTreeMap<String, String>, field: &str) -> Result<Option<u64>, InfoError> {
    stats
        .get(field)
        .map(|v| {
            v.parse().map_err(|_| InfoError::InvalidValue {
                field: field.to_string(),
                value: v.clone(),
            })
        })
        .transpose()
}

/// Encode an info request: an 8-byte header (version, type, 48-bit big-endian
/// body length) followed by newline-terminated command names
pub fn encode_request(commands: &[&str]) -> Vec<u8> {
    let body: String = commands.iter().map(|c| format!("{c}\n")).collect();
    let len = (body.len() as u64).to_be_bytes();
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(INFO_MESSAGE_TYPE);
    buf.extend_from_slice(&len[2..]);
    buf.extend_from_slice(body.as_bytes());
    buf
}

/// Decode the body length from a response header
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<usize, InfoError> {
    if header[0] != PROTOCOL_VERSION || header[1] != INFO_MESSAGE_TYPE {
        return Err(InfoError::Protocol(format!(
            "unexpected header version={} type={}",
            header[0], header[1]
        )));
    }
    let mut len = [0u8; 8];
    len[2..].copy_from_slice(&header[2..]);
    let len = u64::from_be_bytes(len) as usize;
    if len > MAX_BODY_LEN {
        return Err(InfoError::Protocol(format!("response too large: {len} bytes")));
    }
    Ok(len)
}

/// Decode a response body of `name\tvalue` lines
pub fn decode_response(body: &[u8]) -> Result<HashMap<String, String>, InfoError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| InfoError::Protocol(format!("response is not UTF-8: {e}")))?;
    Ok(text
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect())
}

/// Source of node information. The reconciler only depends on this trait so
/// tests can script the responses.
#[async_trait]
pub trait InfoClient: Send + Sync {
    /// Issue info commands against `host` and return the value per command
    async fn request(
        &self,
        host: &str,
        commands: &[&str],
    ) -> Result<HashMap<String, String>, InfoError>;

    /// Server version reported by the node
    async fn build(&self, host: &str) -> Result<String, InfoError> {
        let mut response = self.request(host, &["build"]).await?;
        response
            .remove("build")
            .map(|v| v.trim().to_string())
            .ok_or_else(|| InfoError::MissingField("build".to_string()))
    }

    /// Number of nodes the node sees in its cluster
    async fn cluster_size(&self, host: &str) -> Result<u64, InfoError> {
        let stats = self.statistics(host).await?;
        stat_u64(&stats, "cluster_size")?
            .ok_or_else(|| InfoError::MissingField("cluster_size".to_string()))
    }

    /// Whether the node still has partitions to migrate
    async fn migrations_in_progress(&self, host: &str) -> Result<bool, InfoError> {
        let stats = self.statistics(host).await?;
        if let Some(remaining) = stat_u64(&stats, "migrate_partitions_remaining")? {
            return Ok(remaining > 0);
        }
        let send = stat_u64(&stats, "migrate_progress_send")?;
        let recv = stat_u64(&stats, "migrate_progress_recv")?;
        match (send, recv) {
            (None, None) => Err(InfoError::MissingField(
                "migrate_partitions_remaining".to_string(),
            )),
            (send, recv) => Ok(send.unwrap_or(0) > 0 || recv.unwrap_or(0) > 0),
        }
    }

    async fn statistics(&self, host: &str) -> Result<BTreeMap<String, String>, InfoError> {
        let mut response = self.request(host, &["statistics"]).await?;
        let raw = response
            .remove("statistics")
            .ok_or_else(|| InfoError::MissingField("statistics".to_string()))?;
        Ok(parse_pairs(&raw))
    }
}

/// Info client speaking to the service port over TCP
#[derive(Clone, Debug)]
pub struct AerospikeInfoClient {
    port: u16,
    timeout: Duration,
}

impl Default for AerospikeInfoClient {
    fn default() -> Self {
        Self {
            port: SERVICE_PORT,
            timeout: Duration::from_secs(5),
        }
    }
}

impl AerospikeInfoClient {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn exchange(
        &self,
        host: &str,
        commands: &[&str],
    ) -> Result<HashMap<String, String>, InfoError> {
        let mut stream = TcpStream::connect((host, self.port)).await?;
        stream.write_all(&encode_request(commands)).await?;

        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let len = decode_header(&header)?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        decode_response(&body)
    }
}

#[async_trait]
impl InfoClient for AerospikeInfoClient {
    async fn request(
        &self,
        host: &str,
        commands: &[&str],
    ) -> Result<HashMap<String, String>, InfoError> {
        trace!(host = %host, ?commands, "Sending info request");
        tokio::time::timeout(self.timeout, self.exchange(host, commands))
            .await
            .map_err(|_| InfoError::Timeout(self.timeout))?
    }
}
