//! 环形字节缓冲区
//! 位于 socket 与分帧器之间，单生产者单消费者，读空或写满时挂起等待

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// 缓冲区已停止
pub const STATE_STOPPED: u32 = 0;
/// 入泵存活，正在等待 socket 数据
pub const STATE_READY: u32 = 1;
/// 出泵存活，正在等待可写出的数据
pub const STATE_BUSY: u32 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// 缓冲区已停止且剩余数据不足
    #[error("end of stream")]
    Eof,
    /// 请求超出缓冲区容量
    #[error("request exceeds buffer capacity")]
    OutOfRange,
}

struct Inner {
    buf: Vec<u8>,
    /// 读位置，绝对计数，对容量取模得到下标
    tail: i64,
    /// 写位置，绝对计数
    head: i64,
    done: bool,
}

impl Inner {
    #[inline]
    fn used(&self) -> usize {
        (self.head - self.tail) as usize
    }
}

/// 固定容量的环形字节缓冲区
///
/// 读写位置以及存储都由同一把锁保护，唤醒信号在持锁更新位置之后发出，
/// 配合 [`Notify`] 的许可语义避免丢失唤醒。锁内不做任何 await。
pub struct Buffer {
    /// 容量
    size: usize,
    /// 入泵单次从 socket 读取的块大小
    block: usize,
    inner: Mutex<Inner>,
    /// 写入新数据后唤醒消费者
    rcond: Notify,
    /// 腾出空间后唤醒生产者
    wcond: Notify,
    state: AtomicU32,
}

impl Buffer {
    pub fn new(size: usize, block: usize) -> Self {
        Self {
            size,
            block: block.min(size),
            inner: Mutex::new(Inner {
                buf: vec![0; size],
                tail: 0,
                head: 0,
                done: false,
            }),
            rcond: Notify::new(),
            wcond: Notify::new(),
            state: AtomicU32::new(STATE_STOPPED),
        }
    }

    /// 读取正好 n 个字节，数据不足时挂起
    /// 缓冲区停止后先把剩余数据读完，不足 n 字节时返回 Eof
    pub async fn read(&self, n: usize) -> Result<Bytes, Error> {
        if n > self.size {
            return Err(Error::OutOfRange);
        }

        loop {
            {
                let mut inner = self.inner.lock();
                if inner.used() >= n {
                    let out = copy_out(&inner.buf, self.size, inner.tail, n);
                    inner.tail += n as i64;
                    self.wcond.notify_one();
                    return Ok(out);
                }
                if inner.done {
                    return Err(Error::Eof);
                }
            }
            self.rcond.notified().await;
        }
    }

    /// 取出当前缓冲的全部字节，至少一个字节，缓冲区为空时挂起
    pub async fn drain(&self) -> Result<Bytes, Error> {
        loop {
            {
                let mut inner = self.inner.lock();
                let used = inner.used();
                if used > 0 {
                    let out = copy_out(&inner.buf, self.size, inner.tail, used);
                    inner.tail += used as i64;
                    self.wcond.notify_one();
                    return Ok(out);
                }
                if inner.done {
                    return Err(Error::Eof);
                }
            }
            self.rcond.notified().await;
        }
    }

    /// 写入全部字节，空间不足时挂起，必要时分段绕回写入
    pub async fn write(&self, p: &[u8]) -> Result<usize, Error> {
        let mut written = 0;
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.done {
                    return Err(Error::Eof);
                }
                let free = self.size - inner.used();
                if free > 0 {
                    let n = free.min(p.len() - written);
                    let head = inner.head;
                    copy_in(&mut inner.buf, self.size, head, &p[written..written + n]);
                    inner.head += n as i64;
                    written += n;
                    self.rcond.notify_one();
                    if written == p.len() {
                        return Ok(written);
                    }
                }
            }
            self.wcond.notified().await;
        }
    }

    /// 停止缓冲区，唤醒所有等待方，幂等
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock();
            inner.done = true;
        }
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        self.rcond.notify_one();
        self.wcond.notify_one();
    }

    /// 直接写入底层存储的 `[start, end)` 区间，不更新读写位置（测试用）
    pub fn set(&self, p: &[u8], start: usize, end: usize) -> Result<(), Error> {
        if end > self.size || start > end || p.len() != end - start {
            return Err(Error::OutOfRange);
        }

        let mut inner = self.inner.lock();
        inner.buf[start..end].copy_from_slice(p);
        Ok(())
    }

    /// 设置读写位置（测试用）
    pub fn set_pos(&self, tail: i64, head: i64) {
        {
            let mut inner = self.inner.lock();
            inner.tail = tail;
            inner.head = head;
        }
        self.rcond.notify_one();
        self.wcond.notify_one();
    }

    /// 当前 (tail, head) 位置
    pub fn get_pos(&self) -> (i64, i64) {
        let inner = self.inner.lock();
        (inner.tail, inner.head)
    }

    pub fn state(&self) -> u32 {
        self.state.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: u32) {
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block
    }
}

fn copy_in(buf: &mut [u8], size: usize, head: i64, p: &[u8]) {
    let idx = head as usize % size;
    let first = p.len().min(size - idx);
    buf[idx..idx + first].copy_from_slice(&p[..first]);
    if first < p.len() {
        buf[..p.len() - first].copy_from_slice(&p[first..]);
    }
}

fn copy_out(buf: &[u8], size: usize, tail: i64, n: usize) -> Bytes {
    let idx = tail as usize % size;
    let first = n.min(size - idx);
    let mut out = BytesMut::with_capacity(n);
    out.extend_from_slice(&buf[idx..idx + first]);
    if first < n {
        out.extend_from_slice(&buf[..n - first]);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time;

    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let b = Buffer::new(16, 4);
        assert_eq!(b.write(b"abcd").await.unwrap(), 4);
        assert_eq!(&b.read(4).await.unwrap()[..], b"abcd");
        assert_eq!(b.get_pos(), (4, 4));
    }

    #[tokio::test]
    async fn read_blocks_until_data_arrives() {
        let b = Arc::new(Buffer::new(16, 4));

        let reader = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.read(3).await })
        };

        time::sleep(Duration::from_millis(1)).await;
        b.write(b"xyz").await.unwrap();

        assert_eq!(&reader.await.unwrap().unwrap()[..], b"xyz");
    }

    #[tokio::test]
    async fn read_never_returns_short() {
        let b = Arc::new(Buffer::new(16, 4));
        b.write(b"ab").await.unwrap();

        let reader = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.read(4).await })
        };

        time::sleep(Duration::from_millis(1)).await;
        assert!(!reader.is_finished());
        b.write(b"cd").await.unwrap();
        assert_eq!(&reader.await.unwrap().unwrap()[..], b"abcd");
    }

    #[tokio::test]
    async fn read_drains_before_eof() {
        let b = Buffer::new(16, 4);
        b.write(b"abc").await.unwrap();
        b.stop();

        // 停止后先读完剩余数据
        assert_eq!(&b.read(3).await.unwrap()[..], b"abc");
        assert_eq!(b.read(1).await.unwrap_err(), Error::Eof);
    }

    #[tokio::test]
    async fn stop_unblocks_reader() {
        let b = Arc::new(Buffer::new(16, 4));

        let reader = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.read(1).await })
        };

        time::sleep(Duration::from_millis(1)).await;
        b.stop();
        assert_eq!(reader.await.unwrap().unwrap_err(), Error::Eof);
        assert_eq!(b.state(), STATE_STOPPED);
    }

    #[tokio::test]
    async fn write_blocks_when_full() {
        let b = Arc::new(Buffer::new(4, 4));
        b.write(b"abcd").await.unwrap();

        let writer = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.write(b"ef").await })
        };

        time::sleep(Duration::from_millis(1)).await;
        assert!(!writer.is_finished());

        assert_eq!(&b.read(4).await.unwrap()[..], b"abcd");
        assert_eq!(writer.await.unwrap().unwrap(), 2);
        assert_eq!(&b.read(2).await.unwrap()[..], b"ef");
    }

    #[tokio::test]
    async fn write_stopped_is_eof() {
        let b = Buffer::new(4, 4);
        b.stop();
        assert_eq!(b.write(b"a").await.unwrap_err(), Error::Eof);
    }

    #[tokio::test]
    async fn write_wraps_around() {
        let b = Buffer::new(8, 4);
        // 把读写位置推到容量边界附近
        b.set_pos(6, 6);
        b.write(b"abcd").await.unwrap();
        assert_eq!(b.get_pos(), (6, 10));
        assert_eq!(&b.read(4).await.unwrap()[..], b"abcd");
    }

    #[tokio::test]
    async fn write_larger_than_capacity_chunks_through() {
        let b = Arc::new(Buffer::new(4, 4));

        let writer = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.write(b"abcdefgh").await })
        };

        let mut out = Vec::new();
        while out.len() < 8 {
            out.extend_from_slice(&b.read(1).await.unwrap());
        }
        assert_eq!(writer.await.unwrap().unwrap(), 8);
        assert_eq!(&out[..], b"abcdefgh");
    }

    #[tokio::test]
    async fn drain_returns_everything_buffered() {
        let b = Buffer::new(16, 4);
        b.write(b"abcdef").await.unwrap();
        assert_eq!(&b.drain().await.unwrap()[..], b"abcdef");
        assert_eq!(b.get_pos(), (6, 6));

        b.stop();
        assert_eq!(b.drain().await.unwrap_err(), Error::Eof);
    }

    #[tokio::test]
    async fn set_seeds_storage_without_moving_positions() {
        let b = Buffer::new(8, 4);
        b.set(b"abcd", 0, 4).unwrap();
        assert_eq!(b.get_pos(), (0, 0));

        b.set_pos(0, 4);
        assert_eq!(&b.read(4).await.unwrap()[..], b"abcd");
    }

    #[tokio::test]
    async fn set_out_of_range() {
        let b = Buffer::new(4, 4);
        assert_eq!(b.set(b"abcde", 0, 5).unwrap_err(), Error::OutOfRange);
        assert_eq!(b.set(b"ab", 3, 2).unwrap_err(), Error::OutOfRange);
    }

    #[tokio::test]
    async fn oversized_read_is_rejected() {
        let b = Buffer::new(4, 4);
        assert_eq!(b.read(5).await.unwrap_err(), Error::OutOfRange);
    }
}
