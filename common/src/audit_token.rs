/// Fixed-size security descriptor identifying a process's security context
/// at connection time.
///
/// The token is eight 32-bit fields whose layout does not change across OS
/// versions. The gate only uses it as a fallback input for code-identity
/// resolution on platforms whose documented identity mechanism is
/// unavailable; it is never interpreted field by field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditToken([u32; 8]);

impl AuditToken {
    /// Size of the packed token in bytes.
    pub const LEN: usize = 32;

    /// Wraps the raw token fields, in order.
    pub const fn new(fields: [u32; 8]) -> Self {
        Self(fields)
    }

    /// The raw 32-bit fields, in order.
    pub const fn fields(&self) -> [u32; 8] {
        self.0
    }

    /// Packs the token into the canonical byte layout expected by OS
    /// identity-resolution calls that take binary-encoded audit data.
    ///
    /// Fields keep their order and bit pattern; each is laid out in native
    /// byte order, matching the in-memory layout of the kernel structure.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        for (chunk, field) in buf.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&field.to_ne_bytes());
        }
        buf
    }

    /// Inverse of [`AuditToken::to_bytes`].
    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        let mut fields = [0u32; 8];
        for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(4)) {
            *field = u32::from_ne_bytes(chunk.try_into().expect("chunk is 4 bytes"));
        }
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_token_is_32_bytes() {
        let token = AuditToken::new([0; 8]);
        assert_eq!(token.to_bytes().len(), AuditToken::LEN);
    }

    #[test]
    fn packing_preserves_field_order() {
        let token = AuditToken::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let bytes = token.to_bytes();
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
        assert_eq!(&bytes[28..32], &8u32.to_ne_bytes());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let fields = [
            0,
            u32::MAX,
            0xdead_beef,
            501,
            20,
            0x8000_0001,
            42,
            0x7fff_ffff,
        ];
        let token = AuditToken::new(fields);
        let unpacked = AuditToken::from_bytes(&token.to_bytes());
        assert_eq!(unpacked, token);
        assert_eq!(unpacked.fields(), fields);
    }
}
