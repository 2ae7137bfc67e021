//! Raw packet ingestor: Ethernet -> IPv4 -> L4 header decode (spec §4.1
//! "Raw packet ingestor"). Malformed frames are dropped and counted, never
//! propagated as an error to the caller.

use crate::cim::{RawEvent, RawFields, SourceKind, Transport};
use crate::error::IngestError;
use std::net::Ipv4Addr;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETH_HEADER_LEN: usize = 14;

/// Decodes one Ethernet frame into a `RawEvent`. Non-IPv4 EtherTypes are
/// rejected with `MalformedInput` so the caller can count-and-drop rather
/// than treat them as a crash (spec: "others counted and ignored").
pub fn decode_frame(frame: &[u8], arrival_time_ns: i64) -> Result<RawEvent, IngestError> {
    if frame.len() < ETH_HEADER_LEN {
        return Err(IngestError::MalformedInput("frame shorter than Ethernet header".to_string()));
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return Err(IngestError::MalformedInput(format!("unhandled ethertype 0x{ethertype:04x}")));
    }
    decode_ipv4(&frame[ETH_HEADER_LEN..], arrival_time_ns)
}

fn decode_ipv4(packet: &[u8], arrival_time_ns: i64) -> Result<RawEvent, IngestError> {
    if packet.len() < 20 {
        return Err(IngestError::MalformedInput("IPv4 header shorter than 20 bytes".to_string()));
    }
    let version = packet[0] >> 4;
    if version != 4 {
        return Err(IngestError::MalformedInput(format!("unsupported IP version {version}")));
    }
    let ihl = (packet[0] & 0x0f) as usize * 4;
    if ihl < 20 || packet.len() < ihl {
        return Err(IngestError::MalformedInput("bad IHL".to_string()));
    }
    let total_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    let protocol = packet[9];
    let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dest_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    let payload = &packet[ihl..];
    let mut fields = RawFields {
        src_ip: Some(src_ip.into()),
        dest_ip: Some(dest_ip.into()),
        bytes: Some(total_len.max(packet.len()) as u64),
        packets: Some(1),
        start_time_ns: Some(arrival_time_ns),
        end_time_ns: Some(arrival_time_ns),
        ..Default::default()
    };

    match protocol {
        6 => decode_tcp(payload, &mut fields)?,
        17 => decode_udp(payload, &mut fields)?,
        1 => decode_icmp(payload, &mut fields)?,
        other => {
            fields.protocol = Some(Transport::from_proto_number(other));
        }
    }

    Ok(RawEvent {
        source: SourceKind::Pcap,
        exporter: None,
        arrival_time_ns,
        fields,
    })
}

fn decode_tcp(payload: &[u8], fields: &mut RawFields) -> Result<(), IngestError> {
    if payload.len() < 14 {
        return Err(IngestError::MalformedInput("TCP header shorter than 14 bytes".to_string()));
    }
    fields.protocol = Some(Transport::Tcp);
    fields.src_port = Some(u16::from_be_bytes([payload[0], payload[1]]));
    fields.dest_port = Some(u16::from_be_bytes([payload[2], payload[3]]));
    fields.tcp_flags = Some(payload[13]);
    Ok(())
}

fn decode_udp(payload: &[u8], fields: &mut RawFields) -> Result<(), IngestError> {
    if payload.len() < 8 {
        return Err(IngestError::MalformedInput("UDP header shorter than 8 bytes".to_string()));
    }
    fields.protocol = Some(Transport::Udp);
    fields.src_port = Some(u16::from_be_bytes([payload[0], payload[1]]));
    fields.dest_port = Some(u16::from_be_bytes([payload[2], payload[3]]));
    let udp_len = u16::from_be_bytes([payload[4], payload[5]]);
    fields.bytes = Some(udp_len as u64);
    Ok(())
}

fn decode_icmp(payload: &[u8], fields: &mut RawFields) -> Result<(), IngestError> {
    if payload.len() < 2 {
        return Err(IngestError::MalformedInput("ICMP header shorter than 2 bytes".to_string()));
    }
    fields.protocol = Some(Transport::Icmp);
    // type/code carried in the high/low byte of a synthetic port pair so
    // downstream detectors that key on (src_port, dest_port) still see them.
    fields.src_port = Some(payload[0] as u16);
    fields.dest_port = Some(payload[1] as u16);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4_tcp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45; // version 4, IHL 5
        ip[2..4].copy_from_slice(&40u16.to_be_bytes());
        ip[9] = 6; // TCP
        ip[12..16].copy_from_slice(&[10, 0, 0, 5]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 6]);

        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&54321u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
        tcp[13] = 0x02; // SYN

        frame.extend(ip);
        frame.extend(tcp);
        frame
    }

    #[test]
    fn decodes_tcp_frame_endpoints_and_flags() {
        let event = decode_frame(&eth_ipv4_tcp_frame(), 1_000).unwrap();
        assert_eq!(event.fields.src_port, Some(54321));
        assert_eq!(event.fields.dest_port, Some(443));
        assert_eq!(event.fields.tcp_flags, Some(0x02));
    }

    #[test]
    fn short_frame_is_malformed_input() {
        let result = decode_frame(&[0u8; 5], 0);
        assert!(matches!(result, Err(IngestError::MalformedInput(_))));
    }

    #[test]
    fn non_ipv4_ethertype_is_rejected() {
        let mut frame = vec![0u8; 20];
        frame[12] = 0x86;
        frame[13] = 0xdd; // IPv6
        assert!(decode_frame(&frame, 0).is_err());
    }
}
