use arrayvec::ArrayVec;

use crate::error::PayloadError;

/// Largest datagram payload a slot can hold. Longer datagrams are truncated on receive.
pub const MAX_DATAGRAM_SIZE: usize = 570;

/// One received datagram, stored by value in a ring slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    data: ArrayVec<u8, MAX_DATAGRAM_SIZE>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut data = ArrayVec::new();
        data.try_extend_from_slice(bytes)
            .map_err(|_| PayloadError::TooLarge {
                len: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            })?;
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
