use bytes::{BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error, Protocol, QoS};

/// connect 标志位字节，负载各字段是否出现都由它决定
#[derive(Clone, Copy)]
struct ConnectFlags(u8);

impl ConnectFlags {
    const CLEAN_SESSION: u8 = 0b0000_0010;
    const WILL: u8 = 0b0000_0100;
    const WILL_QOS: u8 = 0b0001_1000;
    const WILL_RETAIN: u8 = 0b0010_0000;
    const PASSWORD: u8 = 0b0100_0000;
    const USERNAME: u8 = 0b1000_0000;

    fn read(stream: &mut Bytes) -> Result<Self, Error> {
        Ok(Self(packet::read_u8(stream)?))
    }

    fn contains(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    fn clean_session(self) -> bool {
        self.contains(Self::CLEAN_SESSION)
    }

    /// 遗嘱标志未置位时，遗嘱 qos 与 retain 位必须全为 0
    fn last_will(self, stream: &mut Bytes) -> Result<Option<LastWill>, Error> {
        if !self.contains(Self::WILL) {
            if self.contains(Self::WILL_QOS | Self::WILL_RETAIN) {
                return Err(Error::IncorrectPacketFormat);
            }
            return Ok(None);
        }

        let topic = packet::read_string(stream)?;
        let message = packet::read_bytes(stream)?;
        Ok(Some(LastWill {
            topic,
            message,
            qos: QoS::try_from((self.0 & Self::WILL_QOS) >> 3)?,
            retain: self.contains(Self::WILL_RETAIN),
        }))
    }

    fn login(self, stream: &mut Bytes) -> Result<Option<Login>, Error> {
        if !self.contains(Self::USERNAME) && !self.contains(Self::PASSWORD) {
            return Ok(None);
        }

        let mut login = Login {
            username: String::new(),
            password: String::new(),
        };
        if self.contains(Self::USERNAME) {
            login.username = packet::read_string(stream)?;
        }
        if self.contains(Self::PASSWORD) {
            login.password = packet::read_string(stream)?;
        }
        Ok(Some(login))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// 协议版本
    pub protocol: Protocol,
    /// keepalive
    pub keep_alive: u16,
    /// 客户端 id
    pub client_id: String,
    /// 是否开启新会话
    pub clean_session: bool,
    /// 遗嘱消息
    pub last_will: Option<LastWill>,
    /// 登录凭证
    pub login: Option<Login>,
}

impl Connect {
    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        // 可变报头：协议名、协议级别、标志位、keepalive
        if packet::read_string(&mut stream)? != "MQTT" {
            return Err(Error::InvalidProtocol);
        }
        let protocol = match packet::read_u8(&mut stream)? {
            4 => Protocol::V4,
            level => return Err(Error::InvalidProtocolLevel(level)),
        };
        let flags = ConnectFlags::read(&mut stream)?;
        let keep_alive = packet::read_u16(&mut stream)?;

        // 负载，顺序固定：客户端 id、遗嘱、登录凭证
        let client_id = packet::read_string(&mut stream)?;
        let last_will = flags.last_will(&mut stream)?;
        let login = flags.login(&mut stream)?;

        Ok(Connect {
            protocol,
            keep_alive,
            client_id,
            clean_session: flags.clean_session(),
            last_will,
            login,
        })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        stream.put_u8(0x10);
        packet::write_remaining_length(stream, self.len())?;

        packet::write_string(stream, "MQTT");
        stream.put_u8(4);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= ConnectFlags::CLEAN_SESSION;
        }
        if let Some(will) = &self.last_will {
            flags |= ConnectFlags::WILL | (will.qos as u8) << 3;
            if will.retain {
                flags |= ConnectFlags::WILL_RETAIN;
            }
        }
        if let Some(login) = &self.login {
            flags |= ConnectFlags::USERNAME;
            if !login.password.is_empty() {
                flags |= ConnectFlags::PASSWORD;
            }
        }
        stream.put_u8(flags);
        stream.put_u16(self.keep_alive);

        packet::write_string(stream, &self.client_id);
        if let Some(will) = &self.last_will {
            packet::write_string(stream, &will.topic);
            packet::write_bytes(stream, &will.message);
        }
        if let Some(login) = &self.login {
            packet::write_string(stream, &login.username);
            if !login.password.is_empty() {
                packet::write_string(stream, &login.password);
            }
        }

        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        // 协议名 + 协议级别 + 标志位 + keepalive
        let mut len = 2 + 4 + 1 + 1 + 2;
        len += 2 + self.client_id.len();
        if let Some(will) = &self.last_will {
            len += 2 + will.topic.len() + 2 + will.message.len();
        }
        if let Some(login) = &self.login {
            len += 2 + login.username.len();
            if !login.password.is_empty() {
                len += 2 + login.password.len();
            }
        }
        len
    }
}

/// 遗嘱设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    /// 遗嘱发送的目标主题
    pub topic: String,
    /// 遗嘱消息
    pub message: Bytes,
    /// 服务质量
    pub qos: QoS,
    /// 消息保留
    pub retain: bool,
}

/// 登录凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_body(bytes: &[u8]) -> Bytes {
        // 跳过固定头（类型字节 + 单字节剩余长度）
        Bytes::copy_from_slice(&bytes[2..])
    }

    #[test]
    fn read_with_will_and_login() {
        let mut b = BytesMut::new();
        let connect = Connect {
            protocol: Protocol::V4,
            keep_alive: 30,
            client_id: "newt".into(),
            clean_session: true,
            last_will: Some(LastWill {
                topic: "lwt".into(),
                message: Bytes::from_static(b"lol gg"),
                qos: QoS::AtLeastOnce,
                retain: false,
            }),
            login: Some(Login {
                username: "user".into(),
                password: "pass".into(),
            }),
        };
        connect.write(&mut b).unwrap();

        let decoded = Connect::read(frame_body(&b)).unwrap();
        assert_eq!(decoded, connect);
    }

    #[test]
    fn read_username_only_login() {
        let mut b = BytesMut::new();
        packet::write_string(&mut b, "MQTT");
        b.put_u8(4);
        b.put_u8(ConnectFlags::USERNAME);
        b.put_u16(60);
        packet::write_string(&mut b, "newt");
        packet::write_string(&mut b, "user");

        let connect = Connect::read(b.freeze()).unwrap();
        assert_eq!(
            connect.login,
            Some(Login {
                username: "user".into(),
                password: String::new(),
            })
        );
    }

    #[test]
    fn read_rejects_bad_protocol_name() {
        let mut b = BytesMut::new();
        packet::write_string(&mut b, "MQIsdp");
        b.put_u8(4);
        assert!(matches!(
            Connect::read(b.freeze()),
            Err(Error::InvalidProtocol)
        ));
    }

    #[test]
    fn read_rejects_bad_protocol_level() {
        let mut b = BytesMut::new();
        packet::write_string(&mut b, "MQTT");
        b.put_u8(3);
        assert!(matches!(
            Connect::read(b.freeze()),
            Err(Error::InvalidProtocolLevel(3))
        ));
    }

    #[test]
    fn will_flags_without_will_are_rejected() {
        let mut b = BytesMut::new();
        packet::write_string(&mut b, "MQTT");
        b.put_u8(4);
        // 遗嘱 qos 位被置位但遗嘱标志为 0
        b.put_u8(0b0000_1000);
        b.put_u16(60);
        packet::write_string(&mut b, "newt");
        assert!(matches!(
            Connect::read(b.freeze()),
            Err(Error::IncorrectPacketFormat)
        ));
    }
}
