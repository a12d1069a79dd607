//! CRC-32 sealing and verification of framed packets.
//!
//! The checksum covers the protocol id followed by the entire framed packet
//! with its CRC field treated as zero. Salting with the protocol id means
//! traffic from unrelated applications sharing the port fails verification
//! without the id ever appearing on the wire.
//!
//! The CRC field occupies the first [`CRC_LEN`] bytes of every packet, so
//! [`seal`] simply patches those bytes in place after the packet has been
//! serialized.

/// Length, in bytes, of the CRC field at the start of every framed packet.
pub const CRC_LEN: usize = 4;

/// Computes the checksum of a packet whose CRC bytes are treated as zero.
///
/// `body` is everything after the CRC field.
#[must_use]
pub fn compute(protocol_id: u32, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&protocol_id.to_le_bytes());
    hasher.update(&[0u8; CRC_LEN]);
    hasher.update(body);
    hasher.finalize()
}

/// Computes and patches the CRC field of a serialized packet.
///
/// # Panics
///
/// Panics if `packet` is shorter than [`CRC_LEN`].
pub fn seal(protocol_id: u32, packet: &mut [u8]) {
    assert!(packet.len() >= CRC_LEN, "packet too short to seal");
    let crc = compute(protocol_id, &packet[CRC_LEN..]);
    packet[..CRC_LEN].copy_from_slice(&crc.to_le_bytes());
}

/// Verifies the CRC field of a received packet.
///
/// Returns `false` for packets too short to even hold the field.
#[must_use]
pub fn verify(protocol_id: u32, packet: &[u8]) -> bool {
    let Some((field, body)) = packet.split_at_checked(CRC_LEN) else {
        return false;
    };
    let field: [u8; CRC_LEN] = field.try_into().expect("field is CRC_LEN bytes");
    u32::from_le_bytes(field) == compute(protocol_id, body)
}
