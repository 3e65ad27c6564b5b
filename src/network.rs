//! 网络层
//! 本层只关心单个连接的字节与报文读写，不包含任何协议运行时逻辑

pub use circ::Buffer;
pub use client::{Client, ClientInfo, Clients, Conn};
pub use packet::v4;

pub mod circ;
pub mod client;
pub mod packet;
