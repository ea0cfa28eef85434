use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;

mod alloc;
mod config;
mod db;
mod dict;
mod expire;
mod region;
mod server;
mod txn;
mod types;
mod value;

use db::Db;

/// pudis 启动参数
#[derive(Parser, Debug)]
#[command(author, version, about = "Redis-style KV server on a persistent memory region", long_about = None)]
struct Args {
    /// 持久区文件路径
    region: PathBuf,

    /// 监听地址 (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    listen: String,

    /// JSON 配置文件路径
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 解析命令行参数
    let args = Args::parse();

    // 2. 读取 JSON 配置（缺文件用缺省值）
    let cfg = config::load(&args.config)?;
    println!("Starting pudis on region {:?}", args.region);

    // 3. 打开（或初始化）持久区：校验、回滚残留事务、重建空闲链
    let db = Db::open(&args.region, cfg)?;

    // 4. 后台任务：主/expire 字典 rehash 线程 + 活跃过期清扫
    db.start_background();

    // 5. 启动网络服务
    let srv = server::Server::new(db.clone());
    let listen = args.listen.clone();
    let serve_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(&listen, srv).await {
            eprintln!("server error: {}", e);
        }
    });

    // 6. 等 CTRL-C 优雅退出；持久状态随事务提交已落盘，无需别的收尾
    signal::ctrl_c().await?;
    println!("Shutting down…");
    db.shutdown();
    serve_handle.abort();
    Ok(())
}
