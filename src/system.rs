//! 运行计数器
//! 所有客户端共享一份，逐项原子累加，不保证跨计数器的一致性

use std::sync::atomic::AtomicI64;

/// 收发计数，只增不减
#[derive(Debug, Default)]
pub struct Info {
    /// 收到的字节数
    pub bytes_recv: AtomicI64,
    /// 发出的字节数
    pub bytes_sent: AtomicI64,
    /// 收到的报文数
    pub messages_recv: AtomicI64,
    /// 发出的报文数
    pub messages_sent: AtomicI64,
    /// 收到的 publish 报文数
    pub publish_recv: AtomicI64,
    /// 发出的 publish 报文数
    pub publish_sent: AtomicI64,
}

impl Info {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counters_accumulate_across_owners() {
        let info = Arc::new(Info::new());
        let other = Arc::clone(&info);

        info.bytes_recv.fetch_add(16, Ordering::Relaxed);
        other.bytes_recv.fetch_add(4, Ordering::Relaxed);

        assert_eq!(info.bytes_recv.load(Ordering::Relaxed), 20);
    }
}
