//! 连接层配置

use tokio::{fs, io::AsyncReadExt};

/// 读写缓冲区默认容量
const DEFAULT_BUFFER_SIZE: usize = 1024 * 256;
/// 入泵单次从 socket 读取的默认块大小
const DEFAULT_BLOCK_SIZE: usize = 1024 * 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// 读缓冲区容量
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
    /// 写缓冲区容量
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
    /// 入泵单次从 socket 读取的块大小
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let mut file = fs::File::open(path).await?;
        let mut s = String::new();
        file.read_to_string(&mut s).await?;

        Ok(toml::from_str::<Config>(&s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: Config = toml::from_str("read_buffer_size = 1024").unwrap();
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[tokio::test]
    async fn from_path_reads_toml() {
        let dir = std::env::temp_dir().join("newt-mqtt-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.toml");
        std::fs::write(&path, "read_buffer_size = 64\nblock_size = 8\n").unwrap();

        let config = Config::from_path(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.read_buffer_size, 64);
        assert_eq!(config.block_size, 8);
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        assert!(matches!(
            Config::from_path("does-not-exist.toml").await,
            Err(Error::Io(_))
        ));
    }
}
