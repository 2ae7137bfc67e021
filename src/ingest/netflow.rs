//! NetFlow v5/v9 UDP datagram decode (spec §4.1).
//!
//! v5 is a fixed 48-byte record layout; v9 is template-driven and keeps a
//! per-exporter template cache (spec: "maintains a per-exporter template
//! cache keyed by (exporter addr, source_id, template_id)").

use crate::cim::{NetFlowExtras, RawEvent, RawFields, SourceKind, Transport};
use crate::error::IngestError;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;

/// Decodes a NetFlow v5 datagram into one `RawEvent` per record (spec
/// §4.1 "NetFlow v5 parser").
pub fn decode_v5(datagram: &[u8], exporter: IpAddr, arrival_time_ns: i64) -> Result<Vec<RawEvent>, IngestError> {
    if datagram.len() < V5_HEADER_LEN {
        return Err(IngestError::MalformedInput("datagram shorter than v5 header".to_string()));
    }
    let version = u16::from_be_bytes([datagram[0], datagram[1]]);
    if version != 5 {
        return Err(IngestError::UnsupportedVersion(version));
    }
    let count = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    let sys_uptime_ms = u32::from_be_bytes(datagram[4..8].try_into().unwrap()) as i64;
    let unix_secs = u32::from_be_bytes(datagram[8..12].try_into().unwrap()) as i64;

    let needed = V5_HEADER_LEN + count * V5_RECORD_LEN;
    if datagram.len() < needed {
        return Err(IngestError::MalformedInput("datagram shorter than declared record count".to_string()));
    }

    let mut events = Vec::with_capacity(count);
    for i in 0..count {
        let rec = &datagram[V5_HEADER_LEN + i * V5_RECORD_LEN..V5_HEADER_LEN + (i + 1) * V5_RECORD_LEN];
        events.push(decode_v5_record(rec, exporter, unix_secs, sys_uptime_ms, arrival_time_ns));
    }
    Ok(events)
}

fn decode_v5_record(rec: &[u8], exporter: IpAddr, unix_secs: i64, sys_uptime_ms: i64, arrival_time_ns: i64) -> RawEvent {
    let src_ip = Ipv4Addr::new(rec[0], rec[1], rec[2], rec[3]);
    let dest_ip = Ipv4Addr::new(rec[4], rec[5], rec[6], rec[7]);
    let next_hop = Ipv4Addr::new(rec[8], rec[9], rec[10], rec[11]);
    let input_if = u16::from_be_bytes([rec[12], rec[13]]);
    let output_if = u16::from_be_bytes([rec[14], rec[15]]);
    let packets = u32::from_be_bytes(rec[16..20].try_into().unwrap()) as u64;
    let octets = u32::from_be_bytes(rec[20..24].try_into().unwrap()) as u64;
    let first_ms = u32::from_be_bytes(rec[24..28].try_into().unwrap()) as i64;
    let last_ms = u32::from_be_bytes(rec[28..32].try_into().unwrap()) as i64;
    let src_port = u16::from_be_bytes([rec[32], rec[33]]);
    let dest_port = u16::from_be_bytes([rec[34], rec[35]]);
    let tcp_flags = rec[37];
    let protocol = rec[38];
    let tos = rec[39];
    let src_as = u16::from_be_bytes([rec[40], rec[41]]);
    let dst_as = u16::from_be_bytes([rec[42], rec[43]]);
    let src_mask = rec[44];
    let dst_mask = rec[45];

    let start_ns = sysuptime_to_event_time_ns(unix_secs, sys_uptime_ms, first_ms);
    let end_ns = sysuptime_to_event_time_ns(unix_secs, sys_uptime_ms, last_ms);

    RawEvent {
        source: SourceKind::NetflowV5,
        exporter: Some(exporter),
        arrival_time_ns,
        fields: RawFields {
            src_ip: Some(src_ip.into()),
            dest_ip: Some(dest_ip.into()),
            src_port: Some(src_port),
            dest_port: Some(dest_port),
            protocol: Some(Transport::from_proto_number(protocol)),
            bytes: Some(octets),
            packets: Some(packets),
            tcp_flags: Some(tcp_flags),
            start_time_ns: Some(start_ns),
            end_time_ns: Some(end_ns),
            extras: Some(NetFlowExtras {
                next_hop: Some(next_hop.into()),
                input_interface: Some(input_if),
                output_interface: Some(output_if),
                tos: Some(tos),
                src_as: Some(src_as),
                dst_as: Some(dst_as),
                src_mask: Some(src_mask),
                dst_mask: Some(dst_mask),
            }),
        },
    }
}

/// `unix_secs - (sys_uptime - field) / 1000`, expressed in nanoseconds
/// (spec §4.1).
fn sysuptime_to_event_time_ns(unix_secs: i64, sys_uptime_ms: i64, field_ms: i64) -> i64 {
    unix_secs * 1_000_000_000 - (sys_uptime_ms - field_ms) * 1_000_000
}

// --- NetFlow v9 ---

const V9_HEADER_LEN: usize = 20;
const TEMPLATE_FLOWSET_ID: u16 = 0;
const OPTIONS_TEMPLATE_FLOWSET_ID: u16 = 1;

#[derive(Debug, Clone)]
struct FieldSpec {
    field_type: u16,
    length: u16,
}

/// Per-exporter, session-scoped template cache (spec §9 Open Questions:
/// "templates ... session-scoped per exporter without timed expiry").
#[derive(Default)]
pub struct TemplateCache {
    templates: HashMap<(IpAddr, u32, u16), Vec<FieldSpec>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Standard NetFlow v9 field types SENTINEL extracts; all others are
/// skipped by declared length (spec: "unrecognized field types are skipped
/// by length, preserving offset alignment").
mod field_type {
    pub const IN_BYTES: u16 = 1;
    pub const IN_PKTS: u16 = 2;
    pub const PROTOCOL: u16 = 4;
    pub const TCP_FLAGS: u16 = 6;
    pub const L4_SRC_PORT: u16 = 7;
    pub const IPV4_SRC_ADDR: u16 = 8;
    pub const L4_DST_PORT: u16 = 11;
    pub const IPV4_DST_ADDR: u16 = 12;
    pub const LAST_SWITCHED: u16 = 21;
    pub const FIRST_SWITCHED: u16 = 22;
}

/// Decodes a NetFlow v9 datagram, returning the successfully decoded
/// records plus a count of records dropped for referencing an unknown
/// template (spec: "records before a known template are dropped and
/// counted").
pub fn decode_v9(
    datagram: &[u8],
    exporter: IpAddr,
    arrival_time_ns: i64,
    cache: &mut TemplateCache,
) -> Result<(Vec<RawEvent>, usize), IngestError> {
    if datagram.len() < V9_HEADER_LEN {
        return Err(IngestError::MalformedInput("datagram shorter than v9 header".to_string()));
    }
    let version = u16::from_be_bytes([datagram[0], datagram[1]]);
    if version != 9 {
        return Err(IngestError::UnsupportedVersion(version));
    }
    let source_id = u32::from_be_bytes(datagram[16..20].try_into().unwrap());

    let mut events = Vec::new();
    let mut dropped = 0usize;
    let mut offset = V9_HEADER_LEN;

    while offset + 4 <= datagram.len() {
        let flowset_id = u16::from_be_bytes([datagram[offset], datagram[offset + 1]]);
        let length = u16::from_be_bytes([datagram[offset + 2], datagram[offset + 3]]) as usize;
        if length < 4 || offset + length > datagram.len() {
            break;
        }
        let body = &datagram[offset + 4..offset + length];

        match flowset_id {
            TEMPLATE_FLOWSET_ID => parse_template_flowset(body, exporter, source_id, cache),
            OPTIONS_TEMPLATE_FLOWSET_ID => {
                // Not used for canonical fields; skipped entirely by length
                // to keep offset alignment (spec §4.1 sFlow counter-sample
                // rule applies the same principle here).
            }
            template_id => {
                let key = (exporter, source_id, template_id);
                match cache.templates.get(&key) {
                    Some(spec) => {
                        let record_len: usize = spec.iter().map(|f| f.length as usize).sum();
                        if record_len == 0 {
                            continue;
                        }
                        let mut rec_offset = 0;
                        while rec_offset + record_len <= body.len() {
                            let record = &body[rec_offset..rec_offset + record_len];
                            events.push(decode_v9_record(record, spec, exporter, arrival_time_ns));
                            rec_offset += record_len;
                        }
                    }
                    None => {
                        dropped += 1;
                    }
                }
            }
        }
        offset += length;
    }

    Ok((events, dropped))
}

fn parse_template_flowset(body: &[u8], exporter: IpAddr, source_id: u32, cache: &mut TemplateCache) {
    let mut offset = 0;
    while offset + 4 <= body.len() {
        let template_id = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let field_count = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        offset += 4;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            if offset + 4 > body.len() {
                return;
            }
            let field_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
            let length = u16::from_be_bytes([body[offset + 2], body[offset + 3]]);
            fields.push(FieldSpec { field_type, length });
            offset += 4;
        }
        // On template refresh the prior version is replaced atomically
        // (spec: "old version is replaced atomically") via plain insert.
        cache.templates.insert((exporter, source_id, template_id), fields);
    }
}

fn decode_v9_record(record: &[u8], spec: &[FieldSpec], exporter: IpAddr, arrival_time_ns: i64) -> RawEvent {
    let mut fields = RawFields::default();
    let mut first_switched_ms = None;
    let mut last_switched_ms = None;
    let mut offset = 0;

    for field in spec {
        let len = field.length as usize;
        if offset + len > record.len() {
            break;
        }
        let raw = &record[offset..offset + len];
        match field.field_type {
            field_type::IPV4_SRC_ADDR if len == 4 => {
                fields.src_ip = Some(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).into());
            }
            field_type::IPV4_DST_ADDR if len == 4 => {
                fields.dest_ip = Some(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).into());
            }
            field_type::L4_SRC_PORT if len == 2 => {
                fields.src_port = Some(u16::from_be_bytes([raw[0], raw[1]]));
            }
            field_type::L4_DST_PORT if len == 2 => {
                fields.dest_port = Some(u16::from_be_bytes([raw[0], raw[1]]));
            }
            field_type::PROTOCOL if len == 1 => {
                fields.protocol = Some(Transport::from_proto_number(raw[0]));
            }
            field_type::TCP_FLAGS if len == 1 => {
                fields.tcp_flags = Some(raw[0]);
            }
            field_type::IN_BYTES => {
                fields.bytes = Some(be_uint(raw));
            }
            field_type::IN_PKTS => {
                fields.packets = Some(be_uint(raw));
            }
            field_type::FIRST_SWITCHED if len == 4 => {
                first_switched_ms = Some(u32::from_be_bytes(raw.try_into().unwrap()) as i64);
            }
            field_type::LAST_SWITCHED if len == 4 => {
                last_switched_ms = Some(u32::from_be_bytes(raw.try_into().unwrap()) as i64);
            }
            _ => {} // skipped by length, alignment preserved
        }
        offset += len;
    }

    fields.start_time_ns = first_switched_ms.map(|ms| ms * 1_000_000);
    fields.end_time_ns = last_switched_ms.map(|ms| ms * 1_000_000);

    RawEvent {
        source: SourceKind::NetflowV9,
        exporter: Some(exporter),
        arrival_time_ns,
        fields,
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let start = 8 - bytes.len().min(8);
    buf[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(8)..]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn v5_datagram() -> Vec<u8> {
        let mut d = vec![0u8; 24];
        d[0..2].copy_from_slice(&5u16.to_be_bytes());
        d[2..4].copy_from_slice(&1u16.to_be_bytes());
        d[4..8].copy_from_slice(&10_000u32.to_be_bytes()); // sys_uptime
        d[8..12].copy_from_slice(&1_700_000_000u32.to_be_bytes()); // unix_secs

        let mut rec = vec![0u8; 48];
        rec[0..4].copy_from_slice(&[10, 0, 0, 5]);
        rec[4..8].copy_from_slice(&[10, 0, 0, 6]);
        rec[16..20].copy_from_slice(&10u32.to_be_bytes()); // packets
        rec[20..24].copy_from_slice(&1500u32.to_be_bytes()); // octets
        rec[24..28].copy_from_slice(&9_000u32.to_be_bytes()); // first
        rec[28..32].copy_from_slice(&9_500u32.to_be_bytes()); // last
        rec[32..34].copy_from_slice(&54321u16.to_be_bytes());
        rec[34..36].copy_from_slice(&443u16.to_be_bytes());
        rec[38] = 6; // TCP

        d.extend(rec);
        d
    }

    #[test]
    fn v5_record_decodes_s1_scenario() {
        let exporter: IpAddr = Ipv4Addr::new(192, 0, 2, 1).into();
        let events = decode_v5(&v5_datagram(), exporter, 0).unwrap();
        assert_eq!(events.len(), 1);
        let f = &events[0].fields;
        assert_eq!(f.src_port, Some(54321));
        assert_eq!(f.dest_port, Some(443));
        assert_eq!(f.packets, Some(10));
        assert_eq!(f.bytes, Some(1500));
        let duration_secs = (f.end_time_ns.unwrap() - f.start_time_ns.unwrap()) as f64 / 1e9;
        assert!((duration_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn v5_wrong_version_is_unsupported() {
        let mut d = v5_datagram();
        d[0..2].copy_from_slice(&6u16.to_be_bytes());
        assert!(matches!(decode_v5(&d, Ipv4Addr::LOCALHOST.into(), 0), Err(IngestError::UnsupportedVersion(6))));
    }

    fn v9_header(source_id: u32) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0..2].copy_from_slice(&9u16.to_be_bytes());
        h[16..20].copy_from_slice(&source_id.to_be_bytes());
        h
    }

    #[test]
    fn v9_data_before_template_is_dropped_and_counted() {
        let exporter: IpAddr = Ipv4Addr::new(192, 0, 2, 1).into();
        let mut cache = TemplateCache::new();
        let mut datagram = v9_header(1);
        // data flowset referencing unknown template 300
        datagram.extend(300u16.to_be_bytes());
        datagram.extend(8u16.to_be_bytes()); // length = 4 header + 4 body
        datagram.extend([0u8; 4]);

        let (events, dropped) = decode_v9(&datagram, exporter, 0, &mut cache).unwrap();
        assert!(events.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn v9_template_then_data_round_trips_src_ip_and_port() {
        let exporter: IpAddr = Ipv4Addr::new(192, 0, 2, 1).into();
        let mut cache = TemplateCache::new();
        let mut datagram = v9_header(1);

        // Template flowset: id=0, fields = IPV4_SRC_ADDR(4), L4_SRC_PORT(2)
        let mut template_flowset = Vec::new();
        template_flowset.extend(256u16.to_be_bytes()); // template_id
        template_flowset.extend(2u16.to_be_bytes()); // field_count
        template_flowset.extend(field_type_bytes(field_type::IPV4_SRC_ADDR, 4));
        template_flowset.extend(field_type_bytes(field_type::L4_SRC_PORT, 2));
        datagram.extend(0u16.to_be_bytes()); // flowset_id = template
        datagram.extend(((template_flowset.len() + 4) as u16).to_be_bytes());
        datagram.extend(template_flowset);

        // Data flowset referencing template 256
        let mut data = Vec::new();
        data.extend([10, 1, 2, 3]); // src ip
        data.extend(9999u16.to_be_bytes()); // src port
        datagram.extend(256u16.to_be_bytes());
        datagram.extend(((data.len() + 4) as u16).to_be_bytes());
        datagram.extend(data);

        let (events, dropped) = decode_v9(&datagram, exporter, 0, &mut cache).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields.src_ip, Some(Ipv4Addr::new(10, 1, 2, 3).into()));
        assert_eq!(events[0].fields.src_port, Some(9999));
    }

    fn field_type_bytes(field_type: u16, length: u16) -> Vec<u8> {
        let mut v = Vec::with_capacity(4);
        v.extend(field_type.to_be_bytes());
        v.extend(length.to_be_bytes());
        v
    }
}
