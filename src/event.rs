use std::net::Ipv4Addr;

use chrono::{DateTime, SecondsFormat, Utc};
use hickory_proto::rr::RecordType;
use serde::Serialize;

/// One observed DNS question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQueryEvent {
    pub timestamp: DateTime<Utc>,
    /// Question name as seen on the wire, original case.
    pub raw_domain: String,
    /// Registrable domain of `raw_domain`, empty when there is none.
    pub normalized_domain: String,
    pub query_type: RecordType,
    pub source_address: Ipv4Addr,
}

/// Persisted shape of an event, one row per question.
#[derive(Debug, Serialize)]
pub struct EventRow<'a> {
    pub timestamp: String,
    pub raw_domain: &'a str,
    pub domain: &'a str,
    pub query_type: String,
    pub src_ip: Ipv4Addr,
}

impl<'a> From<&'a DnsQueryEvent> for EventRow<'a> {
    fn from(event: &'a DnsQueryEvent) -> Self {
        Self {
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            raw_domain: &event.raw_domain,
            domain: &event.normalized_domain,
            query_type: event.query_type.to_string(),
            src_ip: event.source_address,
        }
    }
}
