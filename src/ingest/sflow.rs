//! sFlow v5 datagram decode (spec §4.1 "sFlow parser").
//!
//! Only flow samples (sample type 1) carry per-packet header data worth
//! extracting; counter samples (type 2) are skipped by declared length so
//! the `(type, length)` framing stays aligned across the whole datagram.

use crate::cim::{RawEvent, RawFields, SourceKind, Transport};
use crate::error::IngestError;
use std::net::{IpAddr, Ipv4Addr};

const HEADER_LEN: usize = 24;
const FLOW_SAMPLE_TYPE: u32 = 1;
const COUNTER_SAMPLE_TYPE: u32 = 2;
const RAW_PACKET_HEADER_FORMAT: u32 = 1;

/// Decodes an sFlow v5 datagram into zero or more `RawEvent`s, one per
/// nested raw-packet-header flow record.
pub fn decode_v5(datagram: &[u8], exporter: IpAddr, arrival_time_ns: i64) -> Result<Vec<RawEvent>, IngestError> {
    if datagram.len() < HEADER_LEN {
        return Err(IngestError::MalformedInput("datagram shorter than sFlow header".to_string()));
    }
    let version = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
    if version != 5 {
        return Err(IngestError::UnsupportedVersion(version as u16));
    }
    let num_samples = u32::from_be_bytes(datagram[20..24].try_into().unwrap()) as usize;

    let mut events = Vec::new();
    let mut offset = HEADER_LEN;

    for _ in 0..num_samples {
        if offset + 8 > datagram.len() {
            break;
        }
        let sample_type = u32::from_be_bytes(datagram[offset..offset + 4].try_into().unwrap());
        let sample_len = u32::from_be_bytes(datagram[offset + 4..offset + 8].try_into().unwrap()) as usize;
        offset += 8;
        if offset + sample_len > datagram.len() {
            break;
        }
        let body = &datagram[offset..offset + sample_len];

        if sample_type == FLOW_SAMPLE_TYPE {
            events.extend(decode_flow_sample(body, exporter, arrival_time_ns));
        }
        // Counter samples (and any other sample type) are skipped entirely
        // by their declared length; framing stays intact either way.
        let _ = COUNTER_SAMPLE_TYPE;

        offset += sample_len;
    }

    Ok(events)
}

/// Flow sample layout: sequence(4) + source_id(4) + sampling_rate(4) +
/// sample_pool(4) + drops(4) + input_if(4) + output_if(4) + record_count(4),
/// then `record_count` flow records of (format(4), length(4), data).
fn decode_flow_sample(body: &[u8], exporter: IpAddr, arrival_time_ns: i64) -> Vec<RawEvent> {
    const SAMPLE_HEADER_LEN: usize = 32;
    if body.len() < SAMPLE_HEADER_LEN {
        return vec![];
    }
    let record_count = u32::from_be_bytes(body[28..32].try_into().unwrap()) as usize;
    let mut offset = SAMPLE_HEADER_LEN;
    let mut events = Vec::new();

    for _ in 0..record_count {
        if offset + 8 > body.len() {
            break;
        }
        let format = u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap());
        let length = u32::from_be_bytes(body[offset + 4..offset + 8].try_into().unwrap()) as usize;
        offset += 8;
        if offset + length > body.len() {
            break;
        }
        let record = &body[offset..offset + length];

        if format == RAW_PACKET_HEADER_FORMAT {
            if let Some(event) = decode_raw_packet_header(record, exporter, arrival_time_ns) {
                events.push(event);
            }
        }
        offset += length;
    }

    events
}

/// Raw packet header record: protocol(4) + frame_length(4) + stripped(4) +
/// header_length(4) + header bytes (Ethernet frame, padded to 4-byte
/// boundary). Only Ethernet/IPv4 (protocol == 1) is decoded.
fn decode_raw_packet_header(record: &[u8], exporter: IpAddr, arrival_time_ns: i64) -> Option<RawEvent> {
    if record.len() < 16 {
        return None;
    }
    let header_protocol = u32::from_be_bytes(record[0..4].try_into().unwrap());
    let frame_length = u32::from_be_bytes(record[4..8].try_into().unwrap()) as u64;
    let header_length = u32::from_be_bytes(record[12..16].try_into().unwrap()) as usize;
    if header_protocol != 1 || record.len() < 16 + header_length {
        return None;
    }
    let header = &record[16..16 + header_length];

    let mut fields = decode_ethernet_ipv4(header)?;
    fields.bytes = Some(frame_length);
    fields.start_time_ns = Some(arrival_time_ns);
    fields.end_time_ns = Some(arrival_time_ns);

    Some(RawEvent {
        source: SourceKind::Sflow,
        exporter: Some(exporter),
        arrival_time_ns,
        fields,
    })
}

fn decode_ethernet_ipv4(frame: &[u8]) -> Option<RawFields> {
    if frame.len() < 14 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != 0x0800 {
        return None;
    }
    let packet = &frame[14..];
    if packet.len() < 20 {
        return None;
    }
    let ihl = (packet[0] & 0x0f) as usize * 4;
    if ihl < 20 || packet.len() < ihl {
        return None;
    }
    let protocol = packet[9];
    let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dest_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let payload = &packet[ihl..];

    let mut fields = RawFields {
        src_ip: Some(src_ip.into()),
        dest_ip: Some(dest_ip.into()),
        packets: Some(1),
        ..Default::default()
    };

    match protocol {
        6 if payload.len() >= 14 => {
            fields.protocol = Some(Transport::Tcp);
            fields.src_port = Some(u16::from_be_bytes([payload[0], payload[1]]));
            fields.dest_port = Some(u16::from_be_bytes([payload[2], payload[3]]));
            fields.tcp_flags = Some(payload[13]);
        }
        17 if payload.len() >= 8 => {
            fields.protocol = Some(Transport::Udp);
            fields.src_port = Some(u16::from_be_bytes([payload[0], payload[1]]));
            fields.dest_port = Some(u16::from_be_bytes([payload[2], payload[3]]));
        }
        1 if payload.len() >= 2 => {
            fields.protocol = Some(Transport::Icmp);
            fields.src_port = Some(payload[0] as u16);
            fields.dest_port = Some(payload[1] as u16);
        }
        other => {
            fields.protocol = Some(Transport::from_proto_number(other));
        }
    }

    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4_udp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 17; // UDP
        ip[12..16].copy_from_slice(&[192, 168, 1, 1]);
        ip[16..20].copy_from_slice(&[192, 168, 1, 2]);
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&53u16.to_be_bytes());
        udp[2..4].copy_from_slice(&33333u16.to_be_bytes());
        frame.extend(ip);
        frame.extend(udp);
        frame
    }

    fn wrap_datagram(eth_frame: &[u8]) -> Vec<u8> {
        let mut raw_record_data = Vec::new();
        raw_record_data.extend(1u32.to_be_bytes()); // header_protocol = ethernet
        raw_record_data.extend((eth_frame.len() as u32).to_be_bytes()); // frame_length
        raw_record_data.extend(0u32.to_be_bytes()); // stripped
        raw_record_data.extend((eth_frame.len() as u32).to_be_bytes()); // header_length
        raw_record_data.extend(eth_frame);

        let mut flow_record = Vec::new();
        flow_record.extend(RAW_PACKET_HEADER_FORMAT.to_be_bytes());
        flow_record.extend((raw_record_data.len() as u32).to_be_bytes());
        flow_record.extend(raw_record_data);

        let mut flow_sample = vec![0u8; 28];
        flow_sample.extend(1u32.to_be_bytes()); // record_count
        flow_sample.extend(flow_record);

        let mut datagram = vec![0u8; HEADER_LEN];
        datagram[0..4].copy_from_slice(&5u32.to_be_bytes());
        datagram[20..24].copy_from_slice(&1u32.to_be_bytes()); // num_samples

        datagram.extend(FLOW_SAMPLE_TYPE.to_be_bytes());
        datagram.extend((flow_sample.len() as u32).to_be_bytes());
        datagram.extend(flow_sample);
        datagram
    }

    #[test]
    fn decodes_flow_sample_udp_endpoints() {
        let exporter: IpAddr = Ipv4Addr::new(10, 10, 10, 10).into();
        let datagram = wrap_datagram(&eth_ipv4_udp_frame());
        let events = decode_v5(&datagram, exporter, 42).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields.src_port, Some(53));
        assert_eq!(events[0].fields.dest_port, Some(33333));
    }

    #[test]
    fn counter_sample_is_skipped_by_length_without_breaking_framing() {
        let exporter: IpAddr = Ipv4Addr::new(10, 10, 10, 10).into();
        let mut datagram = vec![0u8; HEADER_LEN];
        datagram[0..4].copy_from_slice(&5u32.to_be_bytes());
        datagram[20..24].copy_from_slice(&2u32.to_be_bytes()); // num_samples = 2

        // counter sample: type 2, arbitrary 8-byte body, should be skipped whole
        datagram.extend(COUNTER_SAMPLE_TYPE.to_be_bytes());
        datagram.extend(8u32.to_be_bytes());
        datagram.extend([0u8; 8]);

        // followed by a real flow sample
        let flow_datagram = wrap_datagram(&eth_ipv4_udp_frame());
        datagram.extend(&flow_datagram[HEADER_LEN..]);

        let events = decode_v5(&datagram, exporter, 0).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn wrong_version_is_unsupported() {
        let mut datagram = vec![0u8; HEADER_LEN];
        datagram[0..4].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(
            decode_v5(&datagram, Ipv4Addr::LOCALHOST.into(), 0),
            Err(IngestError::UnsupportedVersion(4))
        ));
    }
}
