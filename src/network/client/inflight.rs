//! QoS1/QoS2 在途消息
//! 以 16 位包 id 为键，等待确认期间保存完整报文

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::network::packet::v4::Packet;

/// 在途消息记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightMessage {
    /// 等待确认的报文
    pub packet: Packet,
    /// 创建时间，unix 秒，由调用方给出，过期清理以此为准
    pub created: i64,
    /// 最近一次发送时间，插入时盖章
    pub sent: i64,
    /// 重发次数，由外部重发逻辑维护
    pub resends: u32,
}

impl InflightMessage {
    pub fn new(packet: Packet, created: i64) -> Self {
        Self {
            packet,
            created,
            sent: 0,
            resends: 0,
        }
    }
}

/// 在途消息表
#[derive(Default)]
pub struct Inflight {
    internal: RwLock<HashMap<u16, InflightMessage>>,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 仅当包 id 不存在时插入，插入时将 sent 置为当前时间
    /// 返回是否发生了插入，已存在的记录不会被覆盖
    pub fn set(&self, id: u16, mut message: InflightMessage) -> bool {
        let mut internal = self.internal.write();
        if internal.contains_key(&id) {
            return false;
        }

        message.sent = now_unix();
        internal.insert(id, message);
        true
    }

    pub fn get(&self, id: u16) -> Option<InflightMessage> {
        self.internal.read().get(&id).cloned()
    }

    /// 当前在途消息的快照
    pub fn get_all(&self) -> HashMap<u16, InflightMessage> {
        self.internal.read().clone()
    }

    /// 删除指定包 id 的记录，返回是否真的删除了
    pub fn delete(&self, id: u16) -> bool {
        self.internal.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.internal.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.internal.read().is_empty()
    }

    /// 清理 created 不晚于 expiry 的记录（含等于），返回清理数量
    pub fn clear_expired(&self, expiry: i64) -> i64 {
        let mut internal = self.internal.write();
        let before = internal.len();
        internal.retain(|_, message| message.created > expiry);
        (before - internal.len()) as i64
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
