//! Payload masking as described in [RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3).

/// Applies the 4-byte masking `key` over `buf` in place.
///
/// Byte `i` of the buffer is XORed with `key[i % 4]`. The operation is its own
/// inverse: masking twice with the same key restores the original bytes, so the
/// same function both masks and unmasks.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let word = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let masked = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // the remainder starts on a multiple of 4, so the key restarts at index 0
    apply_mask_bytewise(chunks.into_remainder(), key);
}

/// Reference implementation, one byte at a time.
#[inline]
fn apply_mask_bytewise(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
