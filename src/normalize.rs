//! Normalizer: pure, side-effect-free `RawEvent -> CimRecord` (spec §4.2).

use crate::cim::{
    compute_event_id, compute_raw_hash, determine_direction, CimRecord, RawEvent, Transport,
};
use crate::error::NormalizeError;

/// Converts a `RawEvent` into a `CimRecord`.
///
/// Fails with `InvalidRecord` only when both endpoints are unparseable AND
/// protocol is absent; partial records are otherwise emitted with
/// best-effort fields (spec §4.2).
pub fn normalize(event: &RawEvent) -> Result<CimRecord, NormalizeError> {
    let fields = &event.fields;

    if fields.src_ip.is_none() && fields.dest_ip.is_none() && fields.protocol.is_none() {
        return Err(NormalizeError::InvalidRecord);
    }

    let direction = determine_direction(fields.src_ip, fields.dest_ip);
    let is_internal = direction == crate::cim::Direction::Internal;

    let start_ns = fields.start_time_ns.unwrap_or(event.arrival_time_ns);
    let end_ns = fields.end_time_ns.unwrap_or(start_ns);
    let duration_secs = ((end_ns - start_ns).max(0) as f64) / 1_000_000_000.0;

    let transport = fields.protocol.unwrap_or(Transport::Other(0));

    let event_id = compute_event_id(
        fields.src_ip,
        fields.dest_ip,
        fields.src_port,
        fields.dest_port,
        event.arrival_time_ns,
    );
    let raw_hash = compute_raw_hash(
        fields.src_ip,
        fields.dest_ip,
        fields.src_port,
        fields.dest_port,
        transport,
    );

    Ok(CimRecord {
        event_id,
        event_time_ns: start_ns,
        source: event.source,
        src_ip: fields.src_ip,
        dest_ip: fields.dest_ip,
        src_port: fields.src_port,
        dest_port: fields.dest_port,
        transport,
        bytes: fields.bytes.unwrap_or(0),
        packets: fields.packets.unwrap_or(0),
        direction,
        tcp_flags: fields.tcp_flags.unwrap_or(0),
        duration_secs,
        is_internal,
        raw_hash,
    })
}
