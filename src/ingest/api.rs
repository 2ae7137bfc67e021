//! API ingestor: accepts pre-normalized traffic records pushed over HTTP
//! (spec §4.1 "API ingestor", §6 `POST /ingest`). Unlike the passive
//! ingestors, a malformed submission is reported back to the caller rather
//! than silently dropped.

use crate::cim::{RawEvent, RawFields, SourceKind, Transport};
use crate::error::IngestError;
use serde::Deserialize;
use std::net::IpAddr;

/// Wire shape of one pushed record. `source_ip`/`dest_ip`/`protocol` are
/// required; everything else is optional and defaults per spec §4.1.
#[derive(Debug, Deserialize)]
pub struct ApiRecord {
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub protocol: String,
    #[serde(default)]
    pub source_port: Option<u16>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub packets: Option<u64>,
    #[serde(default)]
    pub timestamp_ns: Option<i64>,
}

/// A `POST /ingest` body is either one record or a batch (spec §6).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestBody {
    Single(ApiRecord),
    Batch(Vec<ApiRecord>),
}

impl IngestBody {
    pub fn into_records(self) -> Vec<ApiRecord> {
        match self {
            IngestBody::Single(r) => vec![r],
            IngestBody::Batch(rs) => rs,
        }
    }
}

fn parse_protocol(s: &str) -> Transport {
    match s.to_ascii_uppercase().as_str() {
        "TCP" => Transport::Tcp,
        "UDP" => Transport::Udp,
        "ICMP" => Transport::Icmp,
        "GRE" => Transport::Gre,
        "ESP" => Transport::Esp,
        "AH" => Transport::Ah,
        "ICMPV6" => Transport::Icmpv6,
        "OSPF" => Transport::Ospf,
        "SCTP" => Transport::Sctp,
        other => other
            .strip_prefix("PROTO_")
            .and_then(|n| n.parse::<u8>().ok())
            .map(Transport::Other)
            .unwrap_or(Transport::Other(0)),
    }
}

/// Converts one validated `ApiRecord` into a `RawEvent`. The only failure
/// mode left after deserialization succeeds is an empty protocol string.
pub fn decode_record(record: ApiRecord, arrival_time_ns: i64) -> Result<RawEvent, IngestError> {
    if record.protocol.trim().is_empty() {
        return Err(IngestError::MalformedInput("protocol must not be empty".to_string()));
    }
    let event_time = record.timestamp_ns.unwrap_or(arrival_time_ns);
    Ok(RawEvent {
        source: SourceKind::Api,
        exporter: None,
        arrival_time_ns,
        fields: RawFields {
            src_ip: Some(record.source_ip),
            dest_ip: Some(record.dest_ip),
            src_port: record.source_port,
            dest_port: record.dest_port,
            protocol: Some(parse_protocol(&record.protocol)),
            bytes: record.bytes.or(Some(0)),
            packets: record.packets.or(Some(1)),
            tcp_flags: Some(0),
            start_time_ns: Some(event_time),
            end_time_ns: Some(event_time),
            extras: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_body_parses_to_one_record() {
        let body: IngestBody = serde_json::from_str(
            r#"{"source_ip":"10.0.0.1","dest_ip":"10.0.0.2","protocol":"tcp","dest_port":443}"#,
        )
        .unwrap();
        let records = body.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dest_port, Some(443));
    }

    #[test]
    fn array_body_parses_to_batch() {
        let body: IngestBody = serde_json::from_str(
            r#"[{"source_ip":"10.0.0.1","dest_ip":"10.0.0.2","protocol":"udp"},
                {"source_ip":"10.0.0.3","dest_ip":"10.0.0.4","protocol":"icmp"}]"#,
        )
        .unwrap();
        assert_eq!(body.into_records().len(), 2);
    }

    #[test]
    fn missing_required_field_fails_to_deserialize() {
        let result: Result<IngestBody, _> = serde_json::from_str(r#"{"source_ip":"10.0.0.1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn decode_record_defaults_packets_and_bytes() {
        let record = ApiRecord {
            source_ip: "10.0.0.1".parse().unwrap(),
            dest_ip: "10.0.0.2".parse().unwrap(),
            protocol: "tcp".to_string(),
            source_port: None,
            dest_port: None,
            bytes: None,
            packets: None,
            timestamp_ns: None,
        };
        let event = decode_record(record, 1_000).unwrap();
        assert_eq!(event.fields.bytes, Some(0));
        assert_eq!(event.fields.packets, Some(1));
        assert_eq!(event.fields.start_time_ns, Some(1_000));
    }
}
