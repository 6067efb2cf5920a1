//! The contract of the non-volatile storage (NVS) collaborator.
//!
//! Tests that change persistent device settings save the NVS of the device
//! before and restore it afterwards. Reading and writing the memory is done
//! by the harness around this crate; the crate only validates the layout of
//! single chunks with the bit-field message model.

use async_trait::async_trait;

use crate::{
    bitfield::{BitMessage, Schema},
    error::{Error, ProtocolError},
};

/// A chunk of the NVS as stored by the device firmware.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NvsChunk {
    /// The ID identifying the kind of chunk.
    pub id: u16,

    pub data: Vec<u8>,
}

/// Saves and restores the NVS of a device.
#[async_trait]
pub trait NvsSnapshot: Send + Sync {
    /// Reads the whole NVS.
    async fn snapshot(&self) -> Result<Vec<u8>, Error>;

    /// Writes back an NVS read with [`Self::snapshot`].
    async fn restore(&self, snapshot: &[u8]) -> Result<(), Error>;

    /// Returns the newest chunk with the given ID, if the NVS holds one.
    async fn chunk(&self, id: u16) -> Result<Option<NvsChunk>, Error>;
}

/// Checks that a chunk has exactly the layout of `schema` and decodes it.
pub fn validate_chunk(schema: &'static Schema, chunk: &NvsChunk) -> Result<BitMessage, Error> {
    if chunk.data.len() != schema.byte_len() {
        return Err(ProtocolError::SizeMismatch {
            expected: schema.byte_len(),
            actual: chunk.data.len(),
        }
        .into());
    }
    Ok(BitMessage::parse_exact(schema, &chunk.data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::FieldDescriptor;

    static CONNECTION_CHUNK: Schema = Schema::new("ConnectionChunk", &[
        FieldDescriptor::new(0xfa, 8, "Host Index", "host_index"),
        FieldDescriptor::new(0xf9, 16, "Wireless PID", "wpid"),
        FieldDescriptor::new(0xf8, 8, "Flags", "flags"),
    ]);

    #[test]
    fn chunks_must_match_the_layout() {
        let chunk = NvsChunk {
            id: 0x0005,
            data: vec![0x02, 0x40, 0x8a, 0x01],
        };
        let decoded = validate_chunk(&CONNECTION_CHUNK, &chunk).unwrap();
        assert_eq!(decoded.uint("wpid").unwrap(), 0x408a);

        let truncated = NvsChunk {
            id: 0x0005,
            data: vec![0x02, 0x40, 0x8a],
        };
        assert!(matches!(
            validate_chunk(&CONNECTION_CHUNK, &truncated),
            Err(Error::Protocol(ProtocolError::SizeMismatch { expected: 4, actual: 3 }))
        ));
    }
}
