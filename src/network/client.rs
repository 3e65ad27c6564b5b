//! 客户端连接
//! 一个客户端独占一条连接、一对环形缓冲区和两个泵任务：
//! 入泵把 socket 字节灌进读缓冲区供分帧器消费，出泵把写缓冲区的字节刷往 socket

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::config::Config;
use crate::network::circ::{self, Buffer};
use crate::network::packet::v4::{Connect, LastWill, Login, Packet};
use crate::network::packet::{self, FixedHeader, PacketType, Protocol};
use crate::system::Info;
use crate::Hook;

pub use inflight::{Inflight, InflightMessage};

pub mod inflight;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 客户端已停止，拒绝继续写出
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection closed by peer")]
    ConnectionAborted,
    #[error("Keep alive timeout")]
    KeepAlive,
    #[error("Buffer: {0}")]
    Buffer(#[from] circ::Error),
    #[error("Packet: {0}")]
    Packet(#[from] packet::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    /// handler 返回的业务错误
    #[error("Handler: {0}")]
    Handler(String),
}

/// 客户端与 broker 之间的双向字节流
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// 对端地址，无法获知时为 None
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Conn for TcpStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }
}

impl Conn for tokio::io::DuplexStream {}

/// 暴露给外部的客户端快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub remote: String,
    pub listener: String,
}

/// connect 报文确定的客户端身份信息
#[derive(Debug, Default)]
pub struct Identity {
    /// mqtt 客户端 id，connect 未携带时生成
    pub id: String,
    /// 接入此连接的 listener 名称
    pub listener: String,
    /// 协议版本
    pub protocol: Protocol,
    /// 登录凭证
    pub login: Option<Login>,
    /// 是否开启新会话
    pub clean_session: bool,
    /// keepalive 秒数，0 表示禁用
    pub keepalive: u16,
    /// 遗嘱消息
    pub last_will: Option<LastWill>,
}

/// 停止状态
/// done 只置位一次，第一个写入的停止原因获胜
#[derive(Default)]
struct State {
    done: AtomicBool,
    stop_cause: OnceLock<Error>,
    /// 分别唤醒阻塞在 socket 上的入泵与出泵
    /// notify_one 的许可语义保证先停后等也不会丢失唤醒
    end_r: Notify,
    end_w: Notify,
}

/// 一个客户端连接
pub struct Client {
    /// connect 报文确定的身份信息
    pub identity: RwLock<Identity>,
    /// 订阅集合，topic -> qos，主题匹配由外部的主题树完成
    pub subscriptions: RwLock<HashMap<String, u8>>,
    /// QoS1/QoS2 在途消息
    pub inflight: Inflight,
    /// 读缓冲区（socket -> 分帧器），clear_buffers 之后为 None
    r: RwLock<Option<Arc<Buffer>>>,
    /// 写缓冲区（序列化 -> socket）
    w: RwLock<Option<Arc<Buffer>>>,
    /// 连接本体，start 时被取出交给两个泵
    conn: Mutex<Option<Box<dyn Conn>>>,
    /// 对端地址
    remote: Option<String>,
    /// 包 id 分配计数
    packet_id: AtomicU32,
    /// 读截止时间，由 keepalive 刷新
    deadline: Mutex<Option<Instant>>,
    /// 写出串行化，保证报文不会在线路上交错
    wlock: tokio::sync::Mutex<()>,
    state: State,
    /// 全局计数器
    system: Arc<Info>,
}

impl Client {
    pub fn new(conn: impl Conn, r: Buffer, w: Buffer, system: Arc<Info>) -> Self {
        let remote = conn.remote_addr().map(|addr| addr.to_string());
        Self {
            identity: RwLock::new(Identity::default()),
            subscriptions: RwLock::new(HashMap::new()),
            inflight: Inflight::new(),
            r: RwLock::new(Some(Arc::new(r))),
            w: RwLock::new(Some(Arc::new(w))),
            conn: Mutex::new(Some(Box::new(conn) as Box<dyn Conn>)),
            remote,
            packet_id: AtomicU32::new(0),
            deadline: Mutex::new(None),
            wlock: tokio::sync::Mutex::new(()),
            state: State::default(),
            system,
        }
    }

    /// 按配置构造两个缓冲区
    pub fn from_config(conn: impl Conn, config: &Config, system: Arc<Info>) -> Self {
        Self::new(
            conn,
            Buffer::new(config.read_buffer_size, config.block_size),
            Buffer::new(config.write_buffer_size, config.block_size),
            system,
        )
    }

    /// 无连接的客户端占位，用于会话恢复等簿记场景
    /// 只有身份、订阅与在途消息可用，读写操作一律拒绝
    pub fn stub(system: Arc<Info>) -> Self {
        let client = Self {
            identity: RwLock::new(Identity::default()),
            subscriptions: RwLock::new(HashMap::new()),
            inflight: Inflight::new(),
            r: RwLock::new(None),
            w: RwLock::new(None),
            conn: Mutex::new(None),
            remote: None,
            packet_id: AtomicU32::new(0),
            deadline: Mutex::new(None),
            wlock: tokio::sync::Mutex::new(()),
            state: State::default(),
            system,
        };
        client.state.done.store(true, Ordering::SeqCst);
        client
    }

    /// 读缓冲区
    pub fn reader(&self) -> Result<Arc<Buffer>, Error> {
        self.r.read().clone().ok_or(Error::ConnectionClosed)
    }

    /// 写缓冲区
    pub fn writer(&self) -> Result<Arc<Buffer>, Error> {
        self.w.read().clone().ok_or(Error::ConnectionClosed)
    }

    /// 启动入泵与出泵
    /// 泵以任一错误退出时都会带着该错误停止整个客户端
    pub fn start(self: &Arc<Self>) {
        let Some(conn) = self.conn.lock().take() else {
            return;
        };
        let (mut conn_r, mut conn_w) = tokio::io::split(conn);

        // 入泵：socket -> 读缓冲区
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = client.ingress(&mut conn_r).await {
                error!(
                    "ingress pump on client {0} exit error: {1:#}",
                    client.identity.read().id,
                    e
                );
                client.stop(e);
            }
        });

        // 出泵：写缓冲区 -> socket
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = client.egress(&mut conn_w).await {
                error!(
                    "egress pump on client {0} exit error: {1:#}",
                    client.identity.read().id,
                    e
                );
                client.stop(e);
            }
        });
    }

    /// 入泵主循环
    /// keepalive 开启时每次 socket 读取都受读截止时间约束
    async fn ingress(&self, conn: &mut ReadHalf<Box<dyn Conn>>) -> Result<(), Error> {
        let buffer = self.reader()?;
        let mut block = vec![0u8; buffer.block_size()];

        loop {
            if self.state.done.load(Ordering::SeqCst) {
                return Ok(());
            }
            buffer.set_state(circ::STATE_READY);

            let read = tokio::select! {
                _ = self.state.end_r.notified() => return Ok(()),
                res = async {
                    match self.read_deadline() {
                        Some(deadline) => match time::timeout_at(deadline, conn.read(&mut block)).await {
                            Ok(read) => read.map(Some),
                            Err(_) => Ok(None),
                        },
                        None => conn.read(&mut block).await.map(Some),
                    }
                } => res?,
            };

            let n = match read {
                Some(n) => n,
                // 超时醒来，截止时间可能在等待期间已被刷新
                None => match self.read_deadline() {
                    None => continue,
                    Some(deadline) if deadline > Instant::now() => continue,
                    Some(_) => return Err(Error::KeepAlive),
                },
            };

            if n == 0 {
                return Err(Error::ConnectionAborted);
            }
            buffer.write(&block[..n]).await?;
        }
    }

    /// 出泵主循环
    async fn egress(&self, conn: &mut WriteHalf<Box<dyn Conn>>) -> Result<(), Error> {
        let buffer = self.writer()?;

        loop {
            buffer.set_state(circ::STATE_BUSY);

            let p = tokio::select! {
                _ = self.state.end_w.notified() => return Ok(()),
                res = buffer.drain() => res?,
            };
            conn.write_all(&p).await?;
        }
    }

    /// 停止客户端：停止两个缓冲区、唤醒泵并关闭连接
    /// 只有第一个到达的停止原因会被记录，重复调用为空操作
    pub fn stop(&self, cause: Error) {
        if self.state.done.swap(true, Ordering::SeqCst) {
            return;
        }
        // 主动关闭走 debug，异常原因提升为 warn
        match cause {
            Error::ConnectionClosed => {
                debug!("client {} stopped: {}", self.identity.read().id, cause)
            }
            _ => warn!("client {} stopped: {}", self.identity.read().id, cause),
        }
        let _ = self.state.stop_cause.set(cause);

        if let Some(buffer) = self.r.read().as_ref() {
            buffer.stop();
        }
        if let Some(buffer) = self.w.read().as_ref() {
            buffer.stop();
        }
        self.state.end_r.notify_one();
        self.state.end_w.notify_one();

        // 尚未启动时连接还在手里，直接丢弃以关闭
        drop(self.conn.lock().take());
    }

    /// 第一个被记录的停止原因
    pub fn stop_cause(&self) -> Option<&Error> {
        self.state.stop_cause.get()
    }

    /// 释放两个缓冲区的引用，只能在 stop 之后调用
    pub fn clear_buffers(&self) {
        *self.r.write() = None;
        *self.w.write() = None;
    }

    /// 用 connect 报文标识客户端身份
    /// 客户端 id 为空时生成一个全局唯一 id；遗嘱标志置位时捕获遗嘱
    /// 本方法不会失败，返回认证钩子的结论，拒绝连接由调用方执行
    pub async fn identify<H: Hook>(&self, listener: &str, connect: &Connect, hook: &H) -> bool {
        {
            let mut identity = self.identity.write();
            identity.listener = listener.to_string();
            identity.protocol = connect.protocol;
            identity.login = connect.login.clone();
            identity.clean_session = connect.clean_session;
            identity.keepalive = connect.keep_alive;
            identity.id = if connect.client_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                connect.client_id.clone()
            };
            identity.last_will = connect.last_will.clone();
        }

        self.refresh_deadline(connect.keep_alive);
        hook.authenticate(connect.login.as_ref()).await
    }

    /// 把读截止时间刷新为 now + keepalive 的 1.5 倍（向上取整）
    /// keepalive 为 0 时关闭截止时间
    fn refresh_deadline(&self, keepalive: u16) {
        let mut deadline = self.deadline.lock();
        *deadline = match keepalive {
            0 => None,
            n => Some(Instant::now() + time::Duration::from_secs((n as u64 * 3).div_ceil(2))),
        };
    }

    fn read_deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// 下一个包 id，取值范围 [1, 65535]，65535 之后回绕到 1
    /// 与仍在途的包 id 冲突由 handler 层处理
    pub fn next_packet_id(&self) -> u32 {
        loop {
            let prev = self.packet_id.load(Ordering::SeqCst);
            let next = prev % 0xFFFF + 1;
            if self
                .packet_id
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }

    /// 记录一条订阅，topic 合法性与主题树登记由外部负责
    pub fn note_subscription(&self, filter: &str, qos: u8) {
        self.subscriptions.write().insert(filter.to_string(), qos);
    }

    /// 移除一条订阅
    pub fn forget_subscription(&self, filter: &str) {
        self.subscriptions.write().remove(filter);
    }

    /// 客户端快照：id、对端地址与 listener 名称
    pub fn info(&self) -> ClientInfo {
        let identity = self.identity.read();
        ClientInfo {
            id: identity.id.clone(),
            remote: self
                .remote
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            listener: identity.listener.clone(),
        }
    }

    /// 读取固定头：一个类型/标志位字节，之后是 1~4 字节的变长剩余长度
    /// 消费掉的每个字节都计入收到字节数
    pub async fn read_fixed_header(&self) -> Result<FixedHeader, Error> {
        let buffer = self.reader()?;

        let byte1 = buffer.read(1).await?;
        self.system.bytes_recv.fetch_add(1, Ordering::Relaxed);
        let mut fixed_header = FixedHeader::decode(byte1[0])?;

        let mut shift = 0;
        loop {
            let byte = buffer.read(1).await?[0];
            self.system.bytes_recv.fetch_add(1, Ordering::Relaxed);

            fixed_header.remaining |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }

            shift += 7;
            // 剩余长度最多四个字节，到此仍有后续字节即为协议错误
            if shift > 21 {
                return Err(packet::Error::MalformedRemainingLength.into());
            }
        }

        Ok(fixed_header)
    }

    /// 按固定头给出的剩余长度读出报文体并解码
    pub async fn read_packet(&self, fixed_header: &FixedHeader) -> Result<Packet, Error> {
        let buffer = self.reader()?;

        let body = buffer.read(fixed_header.remaining).await?;
        self.system
            .bytes_recv
            .fetch_add(fixed_header.remaining as i64, Ordering::Relaxed);

        let packet = Packet::read(fixed_header, body)?;

        self.system.messages_recv.fetch_add(1, Ordering::Relaxed);
        if fixed_header.packet_type == PacketType::Publish {
            self.system.publish_recv.fetch_add(1, Ordering::Relaxed);
        }

        Ok(packet)
    }

    /// 报文读取主循环：分帧后逐个交给 handler，调用严格串行
    /// handler 返回错误、缓冲区停止或解码失败都会结束循环
    /// 客户端已停止时直接返回成功
    pub async fn read<F, Fut>(self: &Arc<Self>, handler: F) -> Result<(), Error>
    where
        F: Fn(Arc<Client>, Packet) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        loop {
            if self.state.done.load(Ordering::SeqCst) {
                return Ok(());
            }

            let fixed_header = self.read_fixed_header().await?;
            let packet = self.read_packet(&fixed_header).await?;

            let keepalive = self.identity.read().keepalive;
            if keepalive > 0 {
                self.refresh_deadline(keepalive);
            }

            handler(Arc::clone(self), packet).await?;
        }
    }

    /// 编码报文写入写缓冲区，返回写出的字节数
    /// 内部持有写锁，并发调用不会让报文在线路上交错
    pub async fn write_packet(&self, packet: Packet) -> Result<usize, Error> {
        if self.state.done.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let buffer = self.writer()?;

        let _guard = self.wlock.lock().await;

        let mut encoded = BytesMut::new();
        packet.write(&mut encoded)?;
        let n = buffer.write(&encoded).await?;

        self.system.bytes_sent.fetch_add(n as i64, Ordering::Relaxed);
        self.system.messages_sent.fetch_add(1, Ordering::Relaxed);
        if packet.packet_type() == PacketType::Publish {
            self.system.publish_sent.fetch_add(1, Ordering::Relaxed);
        }

        Ok(n)
    }
}

/// 客户端注册表，key = 客户端 id
#[derive(Default)]
pub struct Clients {
    internal: RwLock<HashMap<String, Arc<Client>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入客户端，同 id 的旧客户端被静默替换
    pub fn add(&self, client: Arc<Client>) {
        let id = client.identity.read().id.clone();
        self.internal.write().insert(id, client);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.internal.read().get(id).cloned()
    }

    /// 所有客户端的快照，返回的客户端可能正在被并发停止
    pub fn get_all(&self) -> Vec<Arc<Client>> {
        self.internal.read().values().cloned().collect()
    }

    /// 删除指定 id 的客户端，id 不存在时为空操作
    pub fn delete(&self, id: &str) {
        self.internal.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.internal.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.internal.read().is_empty()
    }

    /// 指定 listener 接入的所有客户端，顺序不保证
    pub fn get_by_listener(&self, listener: &str) -> Vec<Arc<Client>> {
        self.internal
            .read()
            .values()
            .filter(|client| client.identity.read().listener == listener)
            .cloned()
            .collect()
    }
}
