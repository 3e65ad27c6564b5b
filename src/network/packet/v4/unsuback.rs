use bytes::{BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAck {
    /// 包 id
    pub packet_id: u16,
}

impl UnsubAck {
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let packet_id = packet::read_u16(&mut stream)?;
        Ok(UnsubAck { packet_id })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        stream.put_u8(0xB0);
        packet::write_remaining_length(stream, self.len())?;
        stream.put_u16(self.packet_id);

        Ok(())
    }

    #[inline]
    fn len(&self) -> usize {
        2
    }
}
