// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};

/// 进程启动时读入的全局配置（JSON，缺省值见 Default）
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// 持久区文件大小（字节）；重新打开时必须一致
    pub region_size: u64,
    /// 主字典初始桶数（2 的幂）
    pub dict_init_size: u64,
    /// 主字典每个分片覆盖的桶数
    pub dict_bucket_per_shard: u64,
    /// expire 字典初始桶数
    pub expire_init_size: u64,
    /// expire 字典每个分片覆盖的桶数
    pub expire_bucket_per_shard: u64,
    /// 后台 rehash 空闲轮询间隔（毫秒）
    pub rehash_interval_ms: u64,
    /// 活跃过期清扫节拍（毫秒）
    pub expire_cycle_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            region_size: 64 * 1024 * 1024,
            dict_init_size: 1024,
            dict_bucket_per_shard: 32,
            expire_init_size: 128,
            expire_bucket_per_shard: 1,
            rehash_interval_ms: 100,
            expire_cycle_ms: 10,
        }
    }
}

impl Config {
    /// 小参数配置：小区文件、小初始表，几十个 key 就能逼出 rehash
    pub fn small_for_tests() -> Config {
        Config {
            region_size: 16 * 1024 * 1024,
            dict_init_size: 8,
            dict_bucket_per_shard: 4,
            expire_init_size: 8,
            expire_bucket_per_shard: 1,
            rehash_interval_ms: 1,
            expire_cycle_ms: 1,
        }
    }
}

/// 从指定路径读取并反序列化 JSON 配置；文件不存在时用缺省值
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let cfg: Config = serde_json::from_str(&data).context("Failed to parse config JSON")?;
    Ok(cfg)
}
