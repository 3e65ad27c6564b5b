use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// 包 id
    pub packet_id: u16,
    /// 对应于每个订阅时传递的主题，且顺序一致
    pub return_codes: Vec<SubscribeReasonCode>,
}

impl SubAck {
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let packet_id = packet::read_u16(&mut stream)?;

        let mut return_codes = Vec::new();
        while stream.has_remaining() {
            let code = packet::read_u8(&mut stream)?;
            return_codes.push(match code {
                0x80 => SubscribeReasonCode::Failure,
                qos => SubscribeReasonCode::Success(qos.try_into()?),
            });
        }

        Ok(Self {
            packet_id,
            return_codes,
        })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        stream.put_u8(0x90);
        packet::write_remaining_length(stream, self.len())?;

        stream.put_u16(self.packet_id);
        let p = self
            .return_codes
            .iter()
            .map(|&code| match code {
                SubscribeReasonCode::Success(qos) => qos as u8,
                SubscribeReasonCode::Failure => 0x80,
            })
            .collect::<Vec<u8>>();
        stream.extend_from_slice(&p);
        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        2 + self.return_codes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReasonCode {
    /// 成功，最大服务质量
    Success(QoS),
    /// 失败
    Failure,
}
