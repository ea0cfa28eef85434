// tests/integration_types.rs

use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use pudis::config::Config;
use pudis::db::Db;
use pudis::server::Server;

/// 辅助：开一个落在临时目录里的库 + 服务入口
fn make_server() -> (TempDir, Arc<Server>) {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests()).unwrap();
    (tmp, Server::new(db))
}

/// 辅助：执行一条命令，拿回原始 RESP 回复
fn cmd(srv: &Server, parts: &[&str]) -> String {
    let argv = parts.iter().map(|s| s.as_bytes().to_vec()).collect();
    String::from_utf8(srv.execute(argv)).unwrap()
}

#[test]
fn test_string_roundtrip() -> Result<()> {
    let (_tmp, srv) = make_server();

    // SET / GET 往返
    assert_eq!(cmd(&srv, &["SET", "foo", "bar"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["GET", "foo"]), "$3\r\nbar\r\n");

    // 覆盖写读到新值
    assert_eq!(cmd(&srv, &["SET", "foo", "baz2"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["GET", "foo"]), "$4\r\nbaz2\r\n");

    // DEL 后读到 nil
    assert_eq!(cmd(&srv, &["DEL", "foo"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["GET", "foo"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["DEL", "foo"]), ":0\r\n");

    // 二进制安全：值里带空格与控制字符
    assert_eq!(cmd(&srv, &["SET", "bin", "a b\t\x01c"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["STRLEN", "bin"]), ":6\r\n");
    Ok(())
}

#[test]
fn test_incr_family() -> Result<()> {
    let (_tmp, srv) = make_server();

    // SET a 1; INCR; INCR; GET → 3
    assert_eq!(cmd(&srv, &["SET", "a", "1"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["INCR", "a"]), ":2\r\n");
    assert_eq!(cmd(&srv, &["INCR", "a"]), ":3\r\n");
    assert_eq!(cmd(&srv, &["GET", "a"]), "$1\r\n3\r\n");

    // 不存在的 key 从 0 起步
    assert_eq!(cmd(&srv, &["INCR", "fresh"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["DECR", "fresh"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["INCRBY", "fresh", "41"]), ":41\r\n");
    assert_eq!(cmd(&srv, &["DECRBY", "fresh", "1"]), ":40\r\n");

    // 非整数值
    assert_eq!(cmd(&srv, &["SET", "s", "abc"]), "+OK\r\n");
    assert_eq!(
        cmd(&srv, &["INCR", "s"]),
        "-ERR value is not an integer or out of range\r\n"
    );

    // 溢出
    assert_eq!(cmd(&srv, &["SET", "big", &i64::MAX.to_string()]), "+OK\r\n");
    assert_eq!(
        cmd(&srv, &["INCR", "big"]),
        "-ERR increment or decrement would overflow\r\n"
    );

    // 浮点增量
    assert_eq!(cmd(&srv, &["SET", "f", "10.5"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["INCRBYFLOAT", "f", "0.1"]), "$4\r\n10.6\r\n");
    Ok(())
}

#[test]
fn test_string_edits() -> Result<()> {
    let (_tmp, srv) = make_server();

    assert_eq!(cmd(&srv, &["APPEND", "s", "Hello "]), ":6\r\n");
    assert_eq!(cmd(&srv, &["APPEND", "s", "World"]), ":11\r\n");
    assert_eq!(cmd(&srv, &["GET", "s"]), "$11\r\nHello World\r\n");
    assert_eq!(cmd(&srv, &["STRLEN", "s"]), ":11\r\n");
    assert_eq!(cmd(&srv, &["STRLEN", "none"]), ":0\r\n");

    // GETRANGE 正负下标
    assert_eq!(cmd(&srv, &["GETRANGE", "s", "0", "4"]), "$5\r\nHello\r\n");
    assert_eq!(cmd(&srv, &["GETRANGE", "s", "-5", "-1"]), "$5\r\nWorld\r\n");
    assert_eq!(cmd(&srv, &["GETRANGE", "s", "9", "2"]), "$0\r\n\r\n");

    // SETRANGE 补零
    assert_eq!(cmd(&srv, &["SETRANGE", "pad", "5", "xy"]), ":7\r\n");
    assert_eq!(cmd(&srv, &["GETRANGE", "pad", "5", "6"]), "$2\r\nxy\r\n");

    // GETSET 换出旧值
    assert_eq!(cmd(&srv, &["GETSET", "s", "next"]), "$11\r\nHello World\r\n");
    assert_eq!(cmd(&srv, &["GETSET", "brandnew", "v"]), "$-1\r\n");
    Ok(())
}

#[test]
fn test_set_options_and_variants() -> Result<()> {
    let (_tmp, srv) = make_server();

    // NX / XX
    assert_eq!(cmd(&srv, &["SET", "k", "v1", "NX"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["SET", "k", "v2", "NX"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["SET", "k", "v3", "XX"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["SET", "nope", "v", "XX"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["GET", "k"]), "$2\r\nv3\r\n");
    assert_eq!(
        cmd(&srv, &["SET", "k", "v", "NX", "XX"]),
        "-ERR syntax error\r\n"
    );
    assert_eq!(cmd(&srv, &["SET", "k", "v", "WAT"]), "-ERR syntax error\r\n");

    // SETNX
    assert_eq!(cmd(&srv, &["SETNX", "n", "1"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["SETNX", "n", "2"]), ":0\r\n");

    // MSET / MGET / MSETNX
    assert_eq!(cmd(&srv, &["MSET", "m1", "a", "m2", "b"]), "+OK\r\n");
    assert_eq!(
        cmd(&srv, &["MGET", "m1", "m2", "missing"]),
        "*3\r\n$1\r\na\r\n$1\r\nb\r\n$-1\r\n"
    );
    assert_eq!(cmd(&srv, &["MSETNX", "m2", "x", "m3", "y"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["EXISTS", "m3"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["MSETNX", "m3", "y", "m4", "z"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["EXISTS", "m3", "m4", "m1"]), ":3\r\n");
    Ok(())
}

#[test]
fn test_expire_commands() -> Result<()> {
    let (_tmp, srv) = make_server();

    // 不存在的 key
    assert_eq!(cmd(&srv, &["EXPIRE", "missing", "5"]), ":0\r\n");

    // EXPIRE 0 等价于 DEL
    assert_eq!(cmd(&srv, &["SET", "k", "v"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["EXPIRE", "k", "0"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["EXISTS", "k"]), ":0\r\n");

    // TTL / PERSIST
    assert_eq!(cmd(&srv, &["SET", "t", "v"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["TTL", "t"]), ":-1\r\n");
    assert_eq!(cmd(&srv, &["EXPIRE", "t", "100"]), ":1\r\n");
    let ttl: i64 = cmd(&srv, &["TTL", "t"])
        .trim_start_matches(':')
        .trim_end()
        .parse()?;
    assert!(ttl > 95 && ttl <= 100, "TTL 应接近 100，实际 {}", ttl);
    let pttl: i64 = cmd(&srv, &["PTTL", "t"])
        .trim_start_matches(':')
        .trim_end()
        .parse()?;
    assert!(pttl > 95_000 && pttl <= 100_000);
    assert_eq!(cmd(&srv, &["PERSIST", "t"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["TTL", "t"]), ":-1\r\n");
    assert_eq!(cmd(&srv, &["PERSIST", "t"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["TTL", "ghost"]), ":-2\r\n");

    // 到点之后读路径按不存在处理（不动状态）
    assert_eq!(cmd(&srv, &["SET", "p", "v"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["PEXPIRE", "p", "30"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["SET", "q", "v"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["PEXPIRE", "q", "30"]), ":1\r\n");
    std::thread::sleep(std::time::Duration::from_millis(80));
    // q 到点但还没被任何写路径碰过、清扫任务也没跑：
    // TTL / PTTL 作为第一个观察者必须回 -2
    assert_eq!(cmd(&srv, &["TTL", "q"]), ":-2\r\n");
    assert_eq!(cmd(&srv, &["PTTL", "q"]), ":-2\r\n");
    assert_eq!(cmd(&srv, &["GET", "p"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["EXISTS", "p"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["TTL", "p"]), ":-2\r\n");

    // 覆盖写抹掉 TTL
    assert_eq!(cmd(&srv, &["SET", "w", "v"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["EXPIRE", "w", "100"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["SET", "w", "v2"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["TTL", "w"]), ":-1\r\n");

    // SETEX / SET ... EX 带 TTL
    assert_eq!(cmd(&srv, &["SETEX", "se", "50", "v"]), "+OK\r\n");
    let ttl: i64 = cmd(&srv, &["TTL", "se"])
        .trim_start_matches(':')
        .trim_end()
        .parse()?;
    assert!(ttl > 45 && ttl <= 50);
    assert_eq!(cmd(&srv, &["SET", "sx", "v", "EX", "50"]), "+OK\r\n");
    let ttl: i64 = cmd(&srv, &["TTL", "sx"])
        .trim_start_matches(':')
        .trim_end()
        .parse()?;
    assert!(ttl > 45 && ttl <= 50);
    assert_eq!(
        cmd(&srv, &["SETEX", "bad", "0", "v"]),
        "-ERR invalid expire time in 'SETEX'\r\n"
    );
    Ok(())
}

#[test]
fn test_hash_commands() -> Result<()> {
    let (_tmp, srv) = make_server();

    assert_eq!(cmd(&srv, &["HSET", "user:1", "name", "Alice"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["HSET", "user:1", "name", "Bob"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["HGET", "user:1", "name"]), "$3\r\nBob\r\n");
    assert_eq!(cmd(&srv, &["HGET", "user:1", "none"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["HGET", "nosuch", "f"]), "$-1\r\n");

    assert_eq!(
        cmd(&srv, &["HMSET", "user:1", "mail", "a@b.c", "age", "30"]),
        "+OK\r\n"
    );
    assert_eq!(cmd(&srv, &["HLEN", "user:1"]), ":3\r\n");
    assert_eq!(cmd(&srv, &["HEXISTS", "user:1", "age"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["HEXISTS", "user:1", "pet"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["HSTRLEN", "user:1", "mail"]), ":5\r\n");
    assert_eq!(
        cmd(&srv, &["HMGET", "user:1", "name", "pet", "age"]),
        "*3\r\n$3\r\nBob\r\n$-1\r\n$2\r\n30\r\n"
    );

    // HKEYS（顺序不保证，拆开排序比较）
    let keys = cmd(&srv, &["HKEYS", "user:1"]);
    let mut ks: Vec<&str> = keys
        .split("\r\n")
        .filter(|s| !s.is_empty() && !s.starts_with('*') && !s.starts_with('$'))
        .collect();
    ks.sort_unstable();
    assert_eq!(ks, vec!["age", "mail", "name"]);

    assert_eq!(cmd(&srv, &["HSETNX", "user:1", "name", "x"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["HSETNX", "user:1", "pet", "cat"]), ":1\r\n");

    // 删光 field，整个 key 消失
    assert_eq!(
        cmd(&srv, &["HDEL", "user:1", "name", "mail", "age", "pet"]),
        ":4\r\n"
    );
    assert_eq!(cmd(&srv, &["EXISTS", "user:1"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["HLEN", "user:1"]), ":0\r\n");

    // 类型错误
    assert_eq!(cmd(&srv, &["SET", "plain", "v"]), "+OK\r\n");
    assert_eq!(
        cmd(&srv, &["HGET", "plain", "f"]),
        "-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
    );
    assert_eq!(
        cmd(&srv, &["HSET", "plain", "f", "v"]),
        "-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
    );
    Ok(())
}

#[test]
fn test_set_commands() -> Result<()> {
    let (_tmp, srv) = make_server();

    assert_eq!(cmd(&srv, &["SADD", "s", "a", "b", "a"]), ":2\r\n");
    assert_eq!(cmd(&srv, &["SCARD", "s"]), ":2\r\n");
    assert_eq!(cmd(&srv, &["SISMEMBER", "s", "a"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["SISMEMBER", "s", "z"]), ":0\r\n");

    let members = cmd(&srv, &["SMEMBERS", "s"]);
    let mut ms: Vec<&str> = members
        .split("\r\n")
        .filter(|x| !x.is_empty() && !x.starts_with('*') && !x.starts_with('$'))
        .collect();
    ms.sort_unstable();
    assert_eq!(ms, vec!["a", "b"]);

    // SRANDMEMBER 不改集合
    let m = cmd(&srv, &["SRANDMEMBER", "s"]);
    assert!(m == "$1\r\na\r\n" || m == "$1\r\nb\r\n");
    assert_eq!(cmd(&srv, &["SCARD", "s"]), ":2\r\n");

    // SPOP 弹出成员；集合空了 key 跟着消失
    let popped = cmd(&srv, &["SPOP", "s"]);
    assert!(popped == "$1\r\na\r\n" || popped == "$1\r\nb\r\n");
    assert_eq!(cmd(&srv, &["SCARD", "s"]), ":1\r\n");
    cmd(&srv, &["SPOP", "s"]);
    assert_eq!(cmd(&srv, &["EXISTS", "s"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["SPOP", "s"]), "$-1\r\n");

    // SREM 删空同样删 key
    cmd(&srv, &["SADD", "t", "x", "y"]);
    assert_eq!(cmd(&srv, &["SREM", "t", "x", "z"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["SREM", "t", "y"]), ":1\r\n");
    assert_eq!(cmd(&srv, &["EXISTS", "t"]), ":0\r\n");
    Ok(())
}

#[test]
fn test_keyspace_misc() -> Result<()> {
    let (_tmp, srv) = make_server();

    assert_eq!(cmd(&srv, &["PING"]), "+PONG\r\n");
    assert_eq!(cmd(&srv, &["PING", "hello"]), "$5\r\nhello\r\n");
    assert_eq!(cmd(&srv, &["SELECT", "0"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["DBSIZE"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["RANDOMKEY"]), "$-1\r\n");

    cmd(&srv, &["SET", "only", "v"]);
    assert_eq!(cmd(&srv, &["RANDOMKEY"]), "$4\r\nonly\r\n");
    assert_eq!(cmd(&srv, &["DBSIZE"]), ":1\r\n");

    // FLUSHDB 清空
    cmd(&srv, &["SET", "k2", "v"]);
    cmd(&srv, &["EXPIRE", "k2", "100"]);
    assert_eq!(cmd(&srv, &["FLUSHDB"]), "+OK\r\n");
    assert_eq!(cmd(&srv, &["DBSIZE"]), ":0\r\n");
    assert_eq!(cmd(&srv, &["GET", "only"]), "$-1\r\n");
    assert_eq!(cmd(&srv, &["TTL", "k2"]), ":-2\r\n");

    // 多 key DEL / EXISTS 计数
    cmd(&srv, &["MSET", "a", "1", "b", "2", "c", "3"]);
    assert_eq!(cmd(&srv, &["EXISTS", "a", "b", "nope", "c"]), ":3\r\n");
    assert_eq!(cmd(&srv, &["DEL", "a", "nope", "c"]), ":2\r\n");
    assert_eq!(cmd(&srv, &["DBSIZE"]), ":1\r\n");

    // 未知命令与参数错误
    assert!(cmd(&srv, &["NOSUCHCMD", "x"]).starts_with("-ERR unknown command"));
    assert_eq!(
        cmd(&srv, &["GET", "a", "extra"]),
        "-ERR wrong number of arguments for 'GET'\r\n"
    );
    assert_eq!(
        cmd(&srv, &["SET", "onlykey"]),
        "-ERR wrong number of arguments for 'SET'\r\n"
    );
    Ok(())
}
