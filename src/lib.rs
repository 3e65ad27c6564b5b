//! mqtt 3.1.1 broker 的连接层库
//! 管理单个客户端连接：环形缓冲、报文分帧、QoS 在途消息与停止语义，
//! 主题匹配、保留消息等协议层逻辑由上层实现

use async_trait::async_trait;
use network::v4::Login;

pub mod config;
pub mod network;
pub mod system;

/// mqtt 事件发生时的回调，由用户实现
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// 客户端认证
    async fn authenticate(&self, login: Option<&Login>) -> bool;
}

/// 默认全部放行，测试或免认证场景使用
pub struct HookNoop;

#[async_trait]
impl Hook for HookNoop {
    /// 客户端认证
    async fn authenticate(&self, _login: Option<&Login>) -> bool {
        true
    }
}
