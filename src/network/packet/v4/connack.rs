use bytes::{BufMut, Bytes, BytesMut};

use crate::network::packet::{self, Error};

/// 连接返回码
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    /// 成功
    Success = 0,
    /// 服务器不支持协议版本
    RefusedProtocolVersion,
    /// 客户端 id 不合法，比如长度超过 23 个字符，包含了不允许的字符等
    BadClientId,
    /// 服务器不可用
    ServiceUnavailable,
    /// 错误的用户名或密码
    BadUserNamePassword,
    /// 未授权
    NotAuthorized,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Success),
            1 => Ok(ConnectReturnCode::RefusedProtocolVersion),
            2 => Ok(ConnectReturnCode::BadClientId),
            3 => Ok(ConnectReturnCode::ServiceUnavailable),
            4 => Ok(ConnectReturnCode::BadUserNamePassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(Error::MalformedPacket),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    /// 用于标识在 broker 上是否已存在该客户端的持久性会话
    pub session_present: bool,
    /// 连接返回码
    pub code: ConnectReturnCode,
}

impl ConnAck {
    pub fn new(code: ConnectReturnCode, session_present: bool) -> Self {
        ConnAck {
            session_present,
            code,
        }
    }

    pub fn read(mut stream: Bytes) -> Result<Self, Error> {
        let flags = packet::read_u8(&mut stream)?;
        let code = packet::read_u8(&mut stream)?;

        Ok(ConnAck {
            session_present: flags & 0x01 != 0,
            code: ConnectReturnCode::try_from(code)?,
        })
    }

    pub fn write(&self, stream: &mut BytesMut) -> Result<(), Error> {
        stream.put_u8(0x20);
        packet::write_remaining_length(stream, self.len())?;
        stream.put_u8(self.session_present as u8);
        stream.put_u8(self.code as u8);

        Ok(())
    }

    /// 报文体长度
    fn len(&self) -> usize {
        // session present + code
        1 + 1
    }
}
