// src/server.rs

//! # 网络层与命令分发
//!
//! 请求是 RESP 的 bulk string 数组（`*N\r\n$len\r\narg\r\n...`）。
//! 每个连接一个 tokio 任务；每条命令按标志从对应事务池取一个事务，
//! Begin → 命令过程（内部按锁捆绑拿锁）→ Commit → 冲刷回复缓冲。
//! 未知命令不占事务槽，直接回错误。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::db::{self, Db};
use crate::expire;
use crate::txn::{Tx, TxError};
use crate::types::{hash, set, string};
use crate::value::format_f64;

// 共享回复常量
pub const CRLF: &[u8] = b"\r\n";
pub const OK: &[u8] = b"+OK\r\n";
pub const CZERO: &[u8] = b":0\r\n";
pub const CONE: &[u8] = b":1\r\n";
pub const NULLBULK: &[u8] = b"$-1\r\n";
pub const EMPTYBULK: &[u8] = b"$0\r\n\r\n";
pub const EMPTYMULTIBULK: &[u8] = b"*0\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";
pub const SYNTAXERR: &[u8] = b"-ERR syntax error\r\n";
pub const WRONGTYPEERR: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";

pub const CMD_WRITE: u32 = 1 << 0;
pub const CMD_READONLY: u32 = 1 << 1;
/// 参数多、日志量大的命令（MSET / HSET / DEL ...）用大日志槽
pub const CMD_LARGE: u32 = 1 << 2;

/// 一条连接上一次请求的上下文：参数与回复缓冲
pub struct Client {
    pub argv: Vec<Vec<u8>>,
    reply: Vec<u8>,
}

impl Client {
    pub fn new(argv: Vec<Vec<u8>>) -> Client {
        Client {
            argv,
            reply: Vec::with_capacity(64),
        }
    }

    pub fn add_reply(&mut self, s: &[u8]) {
        self.reply.extend_from_slice(s);
    }

    pub fn add_reply_bulk(&mut self, s: &[u8]) {
        self.reply.push(b'$');
        self.reply.extend_from_slice(s.len().to_string().as_bytes());
        self.reply.extend_from_slice(CRLF);
        self.reply.extend_from_slice(s);
        self.reply.extend_from_slice(CRLF);
    }

    pub fn add_reply_longlong(&mut self, v: i64) {
        self.reply.push(b':');
        self.reply.extend_from_slice(v.to_string().as_bytes());
        self.reply.extend_from_slice(CRLF);
    }

    pub fn add_reply_double(&mut self, v: f64) {
        let s = format_f64(v);
        self.add_reply_bulk(s.as_bytes());
    }

    pub fn add_reply_multibulk_len(&mut self, n: usize) {
        self.reply.push(b'*');
        self.reply.extend_from_slice(n.to_string().as_bytes());
        self.reply.extend_from_slice(CRLF);
    }

    pub fn add_reply_error(&mut self, msg: &str) {
        self.reply.extend_from_slice(b"-ERR ");
        self.reply.extend_from_slice(msg.as_bytes());
        self.reply.extend_from_slice(CRLF);
    }

    /// 事务层失败：丢弃已写的半截回复，换成错误
    fn set_error_reply(&mut self, e: &TxError) {
        self.reply.clear();
        self.add_reply_error(&e.to_string());
    }

    /// 解析第 i 个参数为整数
    pub fn arg_i64(&self, i: usize) -> Option<i64> {
        std::str::from_utf8(&self.argv[i]).ok()?.parse().ok()
    }

    pub fn into_reply(self) -> Vec<u8> {
        self.reply
    }
}

type CmdProc = fn(&Db, &mut Client, &mut dyn Tx) -> Result<(), TxError>;

struct CommandSpec {
    name: &'static str,
    proc: CmdProc,
    flags: u32,
}

#[rustfmt::skip]
static COMMAND_TABLE: &[CommandSpec] = &[
    // --- 连接 / keyspace ---
    CommandSpec { name: "PING",        proc: ping_command,              flags: CMD_READONLY },
    CommandSpec { name: "EXISTS",      proc: db::exists_command,        flags: CMD_READONLY },
    CommandSpec { name: "DBSIZE",      proc: db::dbsize_command,        flags: CMD_READONLY },
    CommandSpec { name: "SELECT",      proc: db::select_command,        flags: CMD_READONLY },
    CommandSpec { name: "RANDOMKEY",   proc: db::randomkey_command,     flags: CMD_READONLY },
    CommandSpec { name: "DEL",         proc: db::del_command,           flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "FLUSHDB",     proc: db::flushdb_command,       flags: CMD_WRITE },
    // --- 过期 ---
    CommandSpec { name: "EXPIRE",      proc: expire::expire_command,    flags: CMD_WRITE },
    CommandSpec { name: "EXPIREAT",    proc: expire::expireat_command,  flags: CMD_WRITE },
    CommandSpec { name: "PEXPIRE",     proc: expire::pexpire_command,   flags: CMD_WRITE },
    CommandSpec { name: "PEXPIREAT",   proc: expire::pexpireat_command, flags: CMD_WRITE },
    CommandSpec { name: "TTL",         proc: expire::ttl_command,       flags: CMD_READONLY },
    CommandSpec { name: "PTTL",        proc: expire::pttl_command,      flags: CMD_READONLY },
    CommandSpec { name: "PERSIST",     proc: expire::persist_command,   flags: CMD_WRITE },
    // --- String ---
    CommandSpec { name: "SET",         proc: string::set_command,       flags: CMD_WRITE },
    CommandSpec { name: "SETNX",       proc: string::setnx_command,     flags: CMD_WRITE },
    CommandSpec { name: "SETEX",       proc: string::setex_command,     flags: CMD_WRITE },
    CommandSpec { name: "PSETEX",      proc: string::psetex_command,    flags: CMD_WRITE },
    CommandSpec { name: "GET",         proc: string::get_command,       flags: CMD_READONLY },
    CommandSpec { name: "GETSET",      proc: string::getset_command,    flags: CMD_WRITE },
    CommandSpec { name: "GETRANGE",    proc: string::getrange_command,  flags: CMD_READONLY },
    CommandSpec { name: "SETRANGE",    proc: string::setrange_command,  flags: CMD_WRITE },
    CommandSpec { name: "APPEND",      proc: string::append_command,    flags: CMD_WRITE },
    CommandSpec { name: "STRLEN",      proc: string::strlen_command,    flags: CMD_READONLY },
    CommandSpec { name: "MGET",        proc: string::mget_command,      flags: CMD_READONLY },
    CommandSpec { name: "MSET",        proc: string::mset_command,      flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "MSETNX",      proc: string::msetnx_command,    flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "INCR",        proc: string::incr_command,      flags: CMD_WRITE },
    CommandSpec { name: "INCRBY",      proc: string::incrby_command,    flags: CMD_WRITE },
    CommandSpec { name: "INCRBYFLOAT", proc: string::incrbyfloat_command, flags: CMD_WRITE },
    CommandSpec { name: "DECR",        proc: string::decr_command,      flags: CMD_WRITE },
    CommandSpec { name: "DECRBY",      proc: string::decrby_command,    flags: CMD_WRITE },
    // --- Hash ---
    CommandSpec { name: "HSET",        proc: hash::hset_command,        flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "HMSET",       proc: hash::hset_command,        flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "HSETNX",      proc: hash::hsetnx_command,      flags: CMD_WRITE },
    CommandSpec { name: "HGET",        proc: hash::hget_command,        flags: CMD_READONLY },
    CommandSpec { name: "HMGET",       proc: hash::hmget_command,       flags: CMD_READONLY },
    CommandSpec { name: "HDEL",        proc: hash::hdel_command,        flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "HLEN",        proc: hash::hlen_command,        flags: CMD_READONLY },
    CommandSpec { name: "HSTRLEN",     proc: hash::hstrlen_command,     flags: CMD_READONLY },
    CommandSpec { name: "HEXISTS",     proc: hash::hexists_command,     flags: CMD_READONLY },
    CommandSpec { name: "HKEYS",       proc: hash::hkeys_command,       flags: CMD_READONLY },
    CommandSpec { name: "HVALS",       proc: hash::hvals_command,       flags: CMD_READONLY },
    CommandSpec { name: "HGETALL",     proc: hash::hgetall_command,     flags: CMD_READONLY },
    // --- Set ---
    CommandSpec { name: "SADD",        proc: set::sadd_command,         flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "SREM",        proc: set::srem_command,         flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "SCARD",       proc: set::scard_command,        flags: CMD_READONLY },
    CommandSpec { name: "SISMEMBER",   proc: set::sismember_command,    flags: CMD_READONLY },
    CommandSpec { name: "SMEMBERS",    proc: set::smembers_command,     flags: CMD_READONLY },
    CommandSpec { name: "SPOP",        proc: set::spop_command,         flags: CMD_WRITE | CMD_LARGE },
    CommandSpec { name: "SRANDMEMBER", proc: set::srandmember_command,  flags: CMD_READONLY },
];

fn ping_command(_db: &Db, c: &mut Client, _tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() == 1 {
        c.add_reply(PONG);
    } else {
        let msg = c.argv[1].clone();
        c.add_reply_bulk(&msg);
    }
    Ok(())
}

pub struct Server {
    db: Arc<Db>,
    commands: HashMap<&'static str, &'static CommandSpec>,
}

impl Server {
    pub fn new(db: Arc<Db>) -> Arc<Server> {
        let mut commands = HashMap::with_capacity(COMMAND_TABLE.len());
        for spec in COMMAND_TABLE {
            commands.insert(spec.name, spec);
        }
        Arc::new(Server { db, commands })
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// 执行一条已解析的命令，返回 RESP 回复。
    /// 测试与网络层共用这一个入口。
    pub fn execute(&self, argv: Vec<Vec<u8>>) -> Vec<u8> {
        if argv.is_empty() {
            return b"-ERR empty command\r\n".to_vec();
        }
        let name = String::from_utf8_lossy(&argv[0]).to_uppercase();
        let spec = match self.commands.get(name.as_str()) {
            Some(s) => *s,
            None => {
                return format!("-ERR unknown command '{}'\r\n", name).into_bytes();
            }
        };

        // 按命令标志挑事务：只读 / 小 undo / 大 undo
        let mut tx = if spec.flags & CMD_READONLY != 0 {
            self.db.pool.readonly()
        } else if spec.flags & CMD_LARGE != 0 {
            self.db.pool.large_undo()
        } else {
            self.db.pool.undo()
        };

        let mut c = Client::new(argv);
        tx.begin();
        match (spec.proc)(&self.db, &mut c, &mut tx) {
            Ok(()) => {
                if let Err(e) = tx.commit() {
                    tx.abort();
                    c.set_error_reply(&e);
                }
            }
            Err(e) => {
                // 典型是 LogOverflow：回滚，状态不变，回协议错误
                tx.abort();
                c.set_error_reply(&e);
            }
        }
        c.into_reply()
    }
}

/// 增量解析一条 multibulk 请求。
/// 返回 Ok(None) 表示数据还不够；Ok(Some((argv, 消费字节数))) 表示
/// 解析出一条完整请求；Err 是协议违例（连接应当关闭）。
pub fn parse_multibulk(buf: &[u8]) -> std::result::Result<Option<(Vec<Vec<u8>>, usize)>, String> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'*' {
        return Err(format!("expected '*', got '{}'", buf[0] as char));
    }
    let mut pos = 0;
    let count = match read_int_line(buf, &mut pos)? {
        Some(n) => n,
        None => return Ok(None),
    };
    if count <= 0 {
        return Ok(Some((Vec::new(), pos)));
    }

    let mut argv = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(format!("expected '$', got '{}'", buf[pos] as char));
        }
        let len = match read_int_line(buf, &mut pos)? {
            Some(n) if n >= 0 => n as usize,
            Some(n) => return Err(format!("invalid bulk length {}", n)),
            None => return Ok(None),
        };
        // bulk 本体 + 尾随 \r\n
        if buf.len() - pos < len + 2 {
            return Ok(None);
        }
        argv.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Ok(Some((argv, pos)))
}

/// 读 "<type><整数>\r\n" 一行（pos 指向类型字节），返回整数
fn read_int_line(buf: &[u8], pos: &mut usize) -> std::result::Result<Option<i64>, String> {
    let start = *pos + 1;
    let nl = match buf[start..].iter().position(|&b| b == b'\n') {
        Some(i) => start + i,
        None => return Ok(None),
    };
    if nl == start || buf[nl - 1] != b'\r' {
        return Err("malformed line terminator".to_string());
    }
    let s = std::str::from_utf8(&buf[start..nl - 1]).map_err(|_| "non-ascii length")?;
    let n: i64 = s.parse().map_err(|_| format!("invalid integer '{}'", s))?;
    *pos = nl + 1;
    Ok(Some(n))
}

/// TCP 服务循环：每个连接一个任务
pub async fn serve(addr: &str, server: Arc<Server>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    println!("pudis is ready to accept connections on {}", addr);
    loop {
        let (sock, _) = listener.accept().await?;
        let srv = server.clone();
        tokio::spawn(async move {
            handle_client(sock, srv).await;
        });
    }
}

async fn handle_client(mut sock: TcpStream, srv: Arc<Server>) {
    // 攒包换吞吐
    let _ = sock.set_nodelay(false);
    let mut buf: Vec<u8> = Vec::with_capacity(16 * 1024);
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = match sock.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            match parse_multibulk(&buf) {
                Ok(Some((argv, used))) => {
                    buf.drain(..used);
                    if argv.is_empty() {
                        continue;
                    }
                    // 命令路径会拿阻塞锁、做同步刷盘
                    let reply = tokio::task::block_in_place(|| srv.execute(argv));
                    if sock.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = sock
                        .write_all(format!("-ERR Protocol error: {}\r\n", e).as_bytes())
                        .await;
                    return;
                }
            }
        }
    }
}
