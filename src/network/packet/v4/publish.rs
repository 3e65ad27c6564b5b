use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error, FixedHeader, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// 客户端是否之前发送过此消息（是否重新投递）
    pub dup: bool,
    /// 服务质量
    pub qos: QoS,
    /// 消息保留
    pub retain: bool,
    /// 主题
    pub topic: String,
    /// 包 id，qos0 时为 0
    pub packet_id: u16,
    /// 消息负载
    pub payload: Bytes,
}

impl Publish {
    pub fn read(fixed_header: &FixedHeader, mut stream: Bytes) -> Result<Self, Error> {
        let topic = packet::read_string(&mut stream)?;

        // qos1/qos2 的报文才携带包 id
        let packet_id = match fixed_header.qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce | QoS::ExactlyOnce => packet::read_u16(&mut stream)?,
        };

        Ok(Publish {
            dup: fixed_header.dup,
            qos: fixed_header.qos,
            retain: fixed_header.retain,
            topic,
            packet_id,
            payload: stream.copy_to_bytes(stream.remaining()),
        })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        let mut byte1 = 0x30;
        if self.dup {
            byte1 |= 1 << 3;
        }
        byte1 |= (self.qos as u8) << 1;
        if self.retain {
            byte1 |= 0x01;
        }

        stream.put_u8(byte1);
        packet::write_remaining_length(stream, self.len())?;

        packet::write_string(stream, &self.topic);
        if self.qos != QoS::AtMostOnce {
            stream.put_u16(self.packet_id);
        }
        stream.extend_from_slice(&self.payload);

        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        let mut len = 2 + self.topic.len() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            len += 2;
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos1_round_trip_keeps_packet_id() {
        let publish = Publish {
            dup: true,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "a/b".into(),
            packet_id: 311,
            payload: Bytes::from_static(b"x"),
        };

        let mut stream = BytesMut::new();
        publish.write(&mut stream).unwrap();
        assert_eq!(stream[0], 0x3B);

        let fh = FixedHeader::decode(stream[0]).unwrap();
        let body = Bytes::copy_from_slice(&stream[2..]);
        assert_eq!(Publish::read(&fh, body).unwrap(), publish);
    }

    #[test]
    fn qos0_has_no_packet_id() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "t".into(),
            packet_id: 0,
            payload: Bytes::from_static(b"p"),
        };

        let mut stream = BytesMut::new();
        publish.write(&mut stream).unwrap();
        // 类型字节 + 剩余长度 + 主题(2+1) + 负载(1)
        assert_eq!(stream.len(), 2 + 3 + 1);
    }
}
