//! mqtt 3.1.1 报文编解码
//! 只做字节层面的编解码，不包含任何连接状态

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub mod v4;

/// 剩余长度字段允许的最大值（256MB - 1）
const PAYLOAD_MAX_LENGTH: usize = 268_435_455;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),
    #[error("Invalid fixed header flags: {0:#04x}")]
    InvalidFixedHeaderFlags(u8),
    #[error("Malformed remaining length")]
    MalformedRemainingLength,
    #[error("Malformed packet")]
    MalformedPacket,
    #[error("Malformed UTF-8 string")]
    MalformedString,
    #[error("Invalid protocol")]
    InvalidProtocol,
    #[error("Invalid protocol level: {0}")]
    InvalidProtocolLevel(u8),
    #[error("Incorrect packet format")]
    IncorrectPacketFormat,
    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),
    #[error("Payload required")]
    PayloadRequired,
    #[error("Payload too large")]
    PayloadTooLarge,
}

/// 报文类型，取自固定头第一个字节的高四位
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            n => Err(Error::InvalidPacketType(n)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// v3.1.1
    #[default]
    V4,
}

/// 服务质量
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            qos => Err(Error::InvalidQoS(qos)),
        }
    }
}

/// 固定头：类型/标志位字节 + 剩余长度
/// 剩余长度由分帧器从缓冲区逐字节读出后填入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// 是否为重新投递（仅 publish）
    pub dup: bool,
    /// 服务质量
    pub qos: QoS,
    /// 消息保留（仅 publish）
    pub retain: bool,
    /// 剩余长度
    pub remaining: usize,
}

impl FixedHeader {
    /// 解码固定头第一个字节，同时校验各报文类型允许的标志位
    pub fn decode(byte1: u8) -> Result<Self, Error> {
        let packet_type = PacketType::try_from(byte1 >> 4)?;
        let flags = byte1 & 0x0F;

        let mut dup = false;
        let mut qos = QoS::AtMostOnce;
        let mut retain = false;

        match packet_type {
            PacketType::Publish => {
                dup = (byte1 >> 3) & 0x01 != 0;
                qos = QoS::try_from((byte1 >> 1) & 0x03)?;
                retain = byte1 & 0x01 != 0;
            }
            // 这三种报文的标志位固定为 0b0010
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => {
                if flags != 0b0010 {
                    return Err(Error::InvalidFixedHeaderFlags(flags));
                }
                qos = QoS::AtLeastOnce;
            }
            _ => {
                if flags != 0 {
                    return Err(Error::InvalidFixedHeaderFlags(flags));
                }
            }
        }

        Ok(Self {
            packet_type,
            dup,
            qos,
            retain,
            remaining: 0,
        })
    }
}

/// 读取多个字节
fn read_bytes(stream: &mut Bytes) -> Result<Bytes, Error> {
    // 后续可取出的字节的长度
    let len = read_u16(stream)? as usize;

    if len > stream.len() {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.split_to(len))
}

fn read_string(stream: &mut Bytes) -> Result<String, Error> {
    let s = read_bytes(stream)?;
    match String::from_utf8(s.to_vec()) {
        Ok(v) => Ok(v),
        Err(_) => Err(Error::MalformedString),
    }
}

fn read_u16(stream: &mut Bytes) -> Result<u16, Error> {
    if stream.len() < 2 {
        return Err(Error::MalformedPacket);
    }

    Ok(stream.get_u16())
}

fn read_u8(stream: &mut Bytes) -> Result<u8, Error> {
    if stream.is_empty() {
        return Err(Error::MalformedPacket);
    }
    Ok(stream.get_u8())
}

fn write_remaining_length(stream: &mut BytesMut, len: usize) -> Result<usize, Error> {
    if len > PAYLOAD_MAX_LENGTH {
        return Err(Error::PayloadTooLarge);
    }

    let mut done = false;
    let mut x = len;
    let mut count = 0;

    while !done {
        let mut byte = (x % 128) as u8;
        x /= 128;
        if x > 0 {
            byte |= 128;
        }

        stream.put_u8(byte);
        count += 1;
        done = x == 0;
    }

    Ok(count)
}

fn write_bytes(stream: &mut BytesMut, bytes: &[u8]) {
    stream.put_u16(bytes.len() as u16);
    stream.extend_from_slice(bytes);
}

fn write_string(stream: &mut BytesMut, string: &str) {
    write_bytes(stream, string.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_bounds() {
        assert!(PacketType::try_from(0).is_err());
        assert!(PacketType::try_from(15).is_err());
        assert_eq!(PacketType::try_from(3).unwrap(), PacketType::Publish);
        assert_eq!(PacketType::try_from(14).unwrap(), PacketType::Disconnect);
    }

    #[test]
    fn fixed_header_decode_publish_flags() {
        let fh = FixedHeader::decode(0x3B).unwrap();
        assert_eq!(fh.packet_type, PacketType::Publish);
        assert!(fh.dup);
        assert_eq!(fh.qos, QoS::AtLeastOnce);
        assert!(fh.retain);
    }

    #[test]
    fn fixed_header_decode_rejects_publish_qos3() {
        assert!(matches!(FixedHeader::decode(0x36), Err(Error::InvalidQoS(3))));
    }

    #[test]
    fn fixed_header_decode_reserved_flags() {
        // connect 的标志位必须为 0
        assert!(matches!(
            FixedHeader::decode(0x10 | 1 << 1),
            Err(Error::InvalidFixedHeaderFlags(0b0010))
        ));
        // pubrel 的标志位必须为 0b0010
        assert!(FixedHeader::decode(0x60).is_err());
        let fh = FixedHeader::decode(0x62).unwrap();
        assert_eq!(fh.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn remaining_length_encoding() {
        let mut b = BytesMut::new();
        assert_eq!(write_remaining_length(&mut b, 0).unwrap(), 1);
        assert_eq!(&b[..], [0x00]);

        let mut b = BytesMut::new();
        assert_eq!(write_remaining_length(&mut b, 321).unwrap(), 2);
        assert_eq!(&b[..], [0xC1, 0x02]);

        let mut b = BytesMut::new();
        assert_eq!(
            write_remaining_length(&mut b, PAYLOAD_MAX_LENGTH).unwrap(),
            4
        );
        assert_eq!(&b[..], [0xFF, 0xFF, 0xFF, 0x7F]);

        let mut b = BytesMut::new();
        assert!(write_remaining_length(&mut b, PAYLOAD_MAX_LENGTH + 1).is_err());
    }

    #[test]
    fn string_round_trip() {
        let mut b = BytesMut::new();
        write_string(&mut b, "a/b/c");
        let mut stream = b.freeze();
        assert_eq!(read_string(&mut stream).unwrap(), "a/b/c");
        assert!(stream.is_empty());
    }

    #[test]
    fn read_bytes_truncated() {
        let mut stream = Bytes::from_static(&[0x00, 0x05, b'a']);
        assert!(matches!(
            read_bytes(&mut stream),
            Err(Error::MalformedPacket)
        ));
    }
}
