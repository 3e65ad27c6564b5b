//! 3.1.1 协议版本报文

use bytes::{Bytes, BytesMut};

pub use connack::*;
pub use connect::*;
pub use disconnect::*;
pub use pingreq::*;
pub use pingresp::*;
pub use puback::*;
pub use pubcomp::*;
pub use publish::*;
pub use pubrec::*;
pub use pubrel::*;
pub use suback::*;
pub use subscribe::*;
pub use unsuback::*;
pub use unsubscribe::*;

use super::{Error, FixedHeader, PacketType};

pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// 根据固定头分发解码
    /// stream 必须正好是剩余长度指定的报文体字节
    pub fn read(fixed_header: &FixedHeader, stream: Bytes) -> Result<Self, Error> {
        // 没有报文体的 packet 类型，获取到报文头后，可以直接返回
        if fixed_header.remaining == 0 {
            return match fixed_header.packet_type {
                PacketType::PingReq => Ok(Packet::PingReq),
                PacketType::PingResp => Ok(Packet::PingResp),
                PacketType::Disconnect => Ok(Packet::Disconnect),
                _ => Err(Error::PayloadRequired),
            };
        }

        let packet = match fixed_header.packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(stream)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::read(stream)?),
            PacketType::Publish => Packet::Publish(Publish::read(fixed_header, stream)?),
            PacketType::PubAck => Packet::PubAck(PubAck::read(stream)?),
            PacketType::PubRec => Packet::PubRec(PubRec::read(stream)?),
            PacketType::PubRel => Packet::PubRel(PubRel::read(stream)?),
            PacketType::PubComp => Packet::PubComp(PubComp::read(stream)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read(stream)?),
            PacketType::SubAck => Packet::SubAck(SubAck::read(stream)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::read(stream)?),
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck::read(stream)?),
            // 心跳与断连报文不允许携带报文体
            PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect => {
                return Err(Error::IncorrectPacketFormat)
            }
        };

        Ok(packet)
    }

    /// 编码完整报文（固定头 + 报文体）追加到 stream
    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        match self {
            Packet::Connect(connect) => connect.write(stream),
            Packet::ConnAck(ack) => ack.write(stream),
            Packet::Publish(publish) => publish.write(stream),
            Packet::PubAck(puback) => puback.write(stream),
            Packet::PubRec(pubrec) => pubrec.write(stream),
            Packet::PubRel(pubrel) => pubrel.write(stream),
            Packet::PubComp(pubcomp) => pubcomp.write(stream),
            Packet::Subscribe(subscribe) => subscribe.write(stream),
            Packet::SubAck(ack) => ack.write(stream),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.write(stream),
            Packet::UnsubAck(ack) => ack.write(stream),
            Packet::PingReq => PingReq.write(stream),
            Packet::PingResp => PingResp.write(stream),
            Packet::Disconnect => Disconnect.write(stream),
        }
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }
}
