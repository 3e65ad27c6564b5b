use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::network::packet::{self, read_u8, Error, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

impl Subscribe {
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let packet_id = packet::read_u16(&mut stream)?;

        let mut filters = Vec::new();
        while stream.has_remaining() {
            let filter = packet::read_string(&mut stream)?;
            let options = read_u8(&mut stream)?;
            let qos = options & 0b0000_0011;

            filters.push(SubscribeFilter {
                path: filter,
                qos: qos.try_into()?,
            })
        }

        // 订阅报文至少要携带一个过滤器
        if filters.is_empty() {
            return Err(Error::PayloadRequired);
        }

        Ok(Self { packet_id, filters })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        // 固定头标志位固定为 0b0010
        stream.put_u8(0x82);
        packet::write_remaining_length(stream, self.len())?;

        stream.put_u16(self.packet_id);
        for filter in &self.filters {
            packet::write_string(stream, &filter.path);
            stream.put_u8(filter.qos as u8);
        }

        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        2 + self
            .filters
            .iter()
            .map(|f| 2 + f.path.len() + 1)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub path: String,
    pub qos: QoS,
}
