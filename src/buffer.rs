//! Owned byte buffers that move across the worker boundary.
//!
//! ## Why not just `Vec<u8>`?
//!
//! A plain move already avoids copying, but it leaves no trace on the sending
//! side. [`TransferBuffer::transfer`] moves the allocation out and leaves the
//! original value *detached*, so code (and tests) can observe that the sender
//! no longer owns the bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A byte buffer whose allocation can be transferred out, leaving the
/// sender detached.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferBuffer {
    data: Option<Vec<u8>>,
}

impl TransferBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Some(data) }
    }

    /// Move the backing allocation into a new buffer. `self` is left detached.
    ///
    /// Transferring a detached buffer yields another detached buffer.
    pub fn transfer(&mut self) -> TransferBuffer {
        TransferBuffer {
            data: self.data.take(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.data.is_none()
    }

    /// Length in bytes; 0 once detached.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Address of the backing allocation, for identity checks.
    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    /// Consume the buffer, returning its allocation (empty if detached).
    pub fn into_vec(self) -> Vec<u8> {
        self.data.unwrap_or_default()
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl Serialize for TransferBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransferBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_detaches_sender_without_copying() {
        let mut sender = TransferBuffer::new(vec![1, 2, 3, 4]);
        let ptr = sender.as_ptr();

        let receiver = sender.transfer();

        assert!(sender.is_detached());
        assert_eq!(sender.len(), 0);
        assert!(sender.as_slice().is_empty());
        assert_eq!(receiver.as_ptr(), ptr);
        assert_eq!(receiver.into_vec().as_ptr(), ptr);
    }

    #[test]
    fn transfer_of_detached_stays_detached() {
        let mut a = TransferBuffer::new(vec![9]);
        let _b = a.transfer();
        let c = a.transfer();
        assert!(c.is_detached());
        assert!(c.into_vec().is_empty());
    }

    #[test]
    fn serializes_as_byte_sequence() {
        let buf = TransferBuffer::new(vec![0, 255]);
        assert_eq!(serde_json::to_string(&buf).unwrap(), "[0,255]");
        let back: TransferBuffer = serde_json::from_str("[7,8]").unwrap();
        assert_eq!(back.as_slice(), &[7, 8]);
    }
}
