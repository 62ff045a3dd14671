use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::notify::DEFAULT_PORT;

/// RFCOMM サービスの UUID（Android 側と共通）
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x7674047e_6e47_4bf0_831f_209e3f9dd23f);

/// UDP リスナー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatagramConfig {
    /// バインドアドレス
    pub bind_address: IpAddr,
    /// 受信ポート
    pub port: u16,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl DatagramConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// TCP リスナー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl TcpConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Bluetooth (RFCOMM) 設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// RFCOMM チャネル
    pub channel: u16,
    /// 公開するサービス名
    pub service_name: String,
    /// 公開するサービス UUID
    pub service_uuid: Uuid,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            service_name: "AndroidNotifierService".to_string(),
            service_uuid: SERVICE_UUID,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ログレベル
    pub log_level: String,
    /// ユーザー設定ファイル（通知ごとのアクション等）
    pub preferences_path: PathBuf,
    pub datagram: DatagramConfig,
    pub tcp: TcpConfig,
    pub bluetooth: BluetoothConfig,
    /// accept のポーリング間隔（停止要求の検出間隔）
    pub stream_poll_timeout_ms: u64,
    /// 1 接続あたりの読み取りタイムアウト
    pub stream_read_timeout_ms: u64,
    /// 重複判定に使う直近の通知 ID 数
    pub dedup_window: usize,
}

fn config_dir() -> Result<PathBuf> {
    // ~/.config/droid-notifier を使用
    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
    Ok(base_dirs.home_dir().join(".config/droid-notifier"))
}

fn default_preferences_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|_| std::env::temp_dir().join("droid-notifier"))
        .join("preferences.toml")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            preferences_path: default_preferences_path(),
            datagram: DatagramConfig::default(),
            tcp: TcpConfig::default(),
            bluetooth: BluetoothConfig::default(),
            stream_poll_timeout_ms: 500,
            stream_read_timeout_ms: 5000,
            dedup_window: crate::manager::DEFAULT_WINDOW,
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み（存在しない場合はデフォルトを作成して保存）
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            // 初回起動時はデフォルト設定をファイルに保存
            let config = Self::default();
            if let Err(e) = config.save() {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// 現在の設定をファイルに保存
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn stream_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_poll_timeout_ms.max(1))
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_read_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.datagram.port, 10600);
        assert_eq!(config.bluetooth.channel, 1);
        assert_eq!(
            config.bluetooth.service_uuid.to_string(),
            "7674047e-6e47-4bf0-831f-209e3f9dd23f"
        );
        assert_eq!(config.dedup_window, 20);
        assert_eq!(config.stream_poll_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse(
            r#"
            log_level = "debug"

            [datagram]
            port = 20000
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.datagram.port, 20000);
        assert_eq!(config.tcp.port, 10600);
        assert_eq!(config.bluetooth.service_name, "AndroidNotifierService");
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let config = Config::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&content).unwrap();
        assert_eq!(parsed.datagram.socket_addr(), config.datagram.socket_addr());
        assert_eq!(parsed.bluetooth.service_uuid, SERVICE_UUID);
    }
}
