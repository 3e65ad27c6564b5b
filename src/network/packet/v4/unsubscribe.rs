use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    /// 包 id
    pub packet_id: u16,
    /// 要退订的过滤器
    pub filters: Vec<String>,
}

impl Unsubscribe {
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let packet_id = packet::read_u16(&mut stream)?;

        let mut filters = Vec::new();
        while stream.has_remaining() {
            filters.push(packet::read_string(&mut stream)?);
        }

        if filters.is_empty() {
            return Err(Error::PayloadRequired);
        }

        Ok(Self { packet_id, filters })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        // 固定头标志位固定为 0b0010
        stream.put_u8(0xA2);
        packet::write_remaining_length(stream, self.len())?;

        stream.put_u16(self.packet_id);
        for filter in &self.filters {
            packet::write_string(stream, filter);
        }

        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        2 + self.filters.iter().map(|f| 2 + f.len()).sum::<usize>()
    }
}
