//! Ganglia XML stream client.
//!
//! The monitoring daemon writes one full XML dump per TCP connection and
//! closes the socket; the client reads to EOF and parses the document
//! with a streaming event reader.

use std::collections::HashSet;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::info;

use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::{MetricValue, MetricsSnapshot};

/// Connects to the monitoring daemon and produces snapshots.
#[derive(Debug, Clone)]
pub struct GangliaClient {
    host: String,
    port: u16,
    /// Hosts dropped from every snapshot (routers, config servers).
    exclude_hosts: HashSet<String>,
}

impl GangliaClient {
    pub fn new(host: impl Into<String>, port: u16, exclude_hosts: &[String]) -> Self {
        Self {
            host: host.into(),
            port,
            exclude_hosts: exclude_hosts.iter().cloned().collect(),
        }
    }

    /// Pull one fresh snapshot over a new connection.
    pub async fn fetch(&self) -> MetricsResult<MetricsSnapshot> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;

        let xml = String::from_utf8_lossy(&raw);
        let mut snapshot = parse_snapshot(&xml)?;
        snapshot
            .hosts
            .retain(|host, _| !self.exclude_hosts.contains(host));

        info!(hosts = snapshot.hosts.len(), "fresh metrics acquired");
        Ok(snapshot)
    }
}

/// Parse a full XML dump into a snapshot.
pub fn parse_snapshot(xml: &str) -> MetricsResult<MetricsSnapshot> {
    let mut reader = Reader::from_str(xml);
    let mut snapshot = MetricsSnapshot::default();
    let mut current_host: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"HOST" => {
                    current_host = Some(required_attr(&e, "NAME")?);
                }
                b"METRIC" => {
                    let host = current_host
                        .as_deref()
                        .ok_or_else(|| MetricsError::Malformed("METRIC outside HOST".into()))?;
                    let name = required_attr(&e, "NAME")?;
                    let val = required_attr(&e, "VAL")?;
                    let ty = required_attr(&e, "TYPE")?;
                    snapshot.insert_metric(host, &name, parse_value(&name, &val, &ty)?);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(snapshot)
}

fn required_attr(element: &BytesStart<'_>, key: &str) -> MetricsResult<String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| MetricsError::Malformed(e.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| MetricsError::Malformed(e.to_string()))?;
            return Ok(value.into_owned());
        }
    }
    Err(MetricsError::Malformed(format!(
        "missing attribute {key} on <{}>",
        String::from_utf8_lossy(element.name().as_ref())
    )))
}

fn parse_value(name: &str, val: &str, ty: &str) -> MetricsResult<MetricValue> {
    match ty {
        "double" | "float" => val
            .parse::<f64>()
            .map(MetricValue::Float)
            .map_err(|_| MetricsError::Malformed(format!("metric {name}: bad float '{val}'"))),
        "uint32" | "int32" | "uint16" | "int16" => val
            .parse::<i64>()
            .map(MetricValue::Int)
            .map_err(|_| MetricsError::Malformed(format!("metric {name}: bad int '{val}'"))),
        _ => Ok(MetricValue::Text(val.to_string())),
    }
}
