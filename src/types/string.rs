// src/types/string.rs

//! String 命令。值以字节串（影子拷贝进 arena）存储；INCR 族写回
//! 内联整数/浮点标签，GET 按标签还原成字符串。
//! SET / GETSET 抹掉旧 TTL，APPEND / SETRANGE / INCR 族保留 TTL。

use crate::db::{now_ns, Db};
use crate::server::{Client, EMPTYBULK, NULLBULK, OK, SYNTAXERR};
use crate::txn::{Tx, TxError};
use crate::types::reply_value_error;
use crate::value::{self, TAG_BYTES, TAG_FLOAT, TAG_INT};

pub fn set_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 {
        c.add_reply_error("wrong number of arguments for 'SET'");
        return Ok(());
    }

    // SET key value [NX|XX] [EX s | PX ms]
    let mut nx = false;
    let mut xx = false;
    let mut expire_ns: Option<i64> = None;
    let mut i = 3;
    while i < c.argv.len() {
        let opt = c.argv[i].to_ascii_uppercase();
        match opt.as_slice() {
            b"NX" => nx = true,
            b"XX" => xx = true,
            b"EX" | b"PX" => {
                if i + 1 >= c.argv.len() {
                    c.add_reply(SYNTAXERR);
                    return Ok(());
                }
                let n = match c.arg_i64(i + 1) {
                    Some(n) => n,
                    None => {
                        c.add_reply_error("value is not an integer or out of range");
                        return Ok(());
                    }
                };
                if n <= 0 {
                    c.add_reply_error("invalid expire time in 'SET'");
                    return Ok(());
                }
                let unit = if opt == b"EX" { 1_000_000_000 } else { 1_000_000 };
                expire_ns = Some(n.saturating_mul(unit));
                i += 1;
            }
            _ => {
                c.add_reply(SYNTAXERR);
                return Ok(());
            }
        }
        i += 1;
    }
    if nx && xx {
        c.add_reply(SYNTAXERR);
        return Ok(());
    }

    let key = c.argv[1].clone();
    let val = c.argv[2].clone();

    db.lock_key_write(tx, &key)?;
    let exists = db.lookup_key(&key).is_some();
    if (nx && exists) || (xx && !exists) {
        c.add_reply(NULLBULK);
        return Ok(());
    }

    let v = value::shadow_copy(&db.region, &db.arena, &val);
    db.set_key(tx, &key, TAG_BYTES, v)?;
    if let Some(d) = expire_ns {
        db.set_expire(tx, &key, now_ns() + d)?;
    }
    c.add_reply(OK);
    Ok(())
}

pub fn setnx_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'SETNX'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;
    if db.lookup_key(&key).is_some() {
        c.add_reply_longlong(0);
        return Ok(());
    }
    let v = value::shadow_copy(&db.region, &db.arena, &c.argv[2].clone());
    db.set_key(tx, &key, TAG_BYTES, v)?;
    c.add_reply_longlong(1);
    Ok(())
}

pub fn setex_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    setex_generic(db, c, tx, 1_000_000_000)
}

pub fn psetex_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    setex_generic(db, c, tx, 1_000_000)
}

fn setex_generic(db: &Db, c: &mut Client, tx: &mut dyn Tx, unit_ns: i64) -> Result<(), TxError> {
    if c.argv.len() != 4 {
        c.add_reply_error("wrong number of arguments for 'SETEX'");
        return Ok(());
    }
    let secs = match c.arg_i64(2) {
        Some(n) if n > 0 => n,
        Some(_) => {
            c.add_reply_error("invalid expire time in 'SETEX'");
            return Ok(());
        }
        None => {
            c.add_reply_error("value is not an integer or out of range");
            return Ok(());
        }
    };
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;
    let v = value::shadow_copy(&db.region, &db.arena, &c.argv[3].clone());
    db.set_key(tx, &key, TAG_BYTES, v)?;
    db.set_expire(tx, &key, now_ns() + secs.saturating_mul(unit_ns))?;
    c.add_reply(OK);
    Ok(())
}

pub fn get_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'GET'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        // 过期：读路径不动状态，按不存在回复
        c.add_reply(NULLBULK);
        return Ok(());
    }
    match db.lookup_key(&key) {
        None => c.add_reply(NULLBULK),
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => c.add_reply_bulk(&s),
            Err(e) => reply_value_error(c, &e),
        },
    }
    Ok(())
}

pub fn getset_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'GETSET'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let old = match db.lookup_key(&key) {
        None => None,
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => Some(s),
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };
    let v = value::shadow_copy(&db.region, &db.arena, &c.argv[2].clone());
    db.set_key(tx, &key, TAG_BYTES, v)?;
    match old {
        Some(s) => c.add_reply_bulk(&s),
        None => c.add_reply(NULLBULK),
    }
    Ok(())
}

pub fn getrange_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 4 {
        c.add_reply_error("wrong number of arguments for 'GETRANGE'");
        return Ok(());
    }
    let (start, end) = match (c.arg_i64(2), c.arg_i64(3)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            c.add_reply_error("value is not an integer or out of range");
            return Ok(());
        }
    };
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply(EMPTYBULK);
        return Ok(());
    }
    let s = match db.lookup_key(&key) {
        None => {
            c.add_reply(EMPTYBULK);
            return Ok(());
        }
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => s,
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };

    // 负下标从尾部数
    let len = s.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let mut end = if end < 0 { len + end } else { end };
    if end >= len {
        end = len - 1;
    }
    if start > end || len == 0 {
        c.add_reply(EMPTYBULK);
        return Ok(());
    }
    c.add_reply_bulk(&s[start as usize..=end as usize]);
    Ok(())
}

pub fn setrange_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 4 {
        c.add_reply_error("wrong number of arguments for 'SETRANGE'");
        return Ok(());
    }
    let offset = match c.arg_i64(2) {
        Some(n) if n >= 0 => n as usize,
        Some(_) => {
            c.add_reply_error("offset is out of range");
            return Ok(());
        }
        None => {
            c.add_reply_error("value is not an integer or out of range");
            return Ok(());
        }
    };
    let key = c.argv[1].clone();
    let patch = c.argv[3].clone();

    db.lock_key_write(tx, &key)?;
    let mut s = match db.lookup_key(&key) {
        None => Vec::new(),
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => s,
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };
    if patch.is_empty() {
        c.add_reply_longlong(s.len() as i64);
        return Ok(());
    }

    // 补零到 offset，再覆盖写入
    if s.len() < offset + patch.len() {
        s.resize(offset + patch.len(), 0);
    }
    s[offset..offset + patch.len()].copy_from_slice(&patch);
    let v = value::shadow_copy(&db.region, &db.arena, &s);
    db.set_value_keep_ttl(tx, &key, TAG_BYTES, v)?;
    c.add_reply_longlong(s.len() as i64);
    Ok(())
}

pub fn append_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'APPEND'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let mut s = match db.lookup_key(&key) {
        None => Vec::new(),
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => s,
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };
    s.extend_from_slice(&c.argv[2]);
    let v = value::shadow_copy(&db.region, &db.arena, &s);
    db.set_value_keep_ttl(tx, &key, TAG_BYTES, v)?;
    c.add_reply_longlong(s.len() as i64);
    Ok(())
}

pub fn strlen_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'STRLEN'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match db.lookup_key(&key) {
        None => c.add_reply_longlong(0),
        Some((t, d)) => match value::string_len(&db.region, t, d) {
            Ok(n) => c.add_reply_longlong(n as i64),
            Err(e) => reply_value_error(c, &e),
        },
    }
    Ok(())
}

pub fn mget_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 2 {
        c.add_reply_error("wrong number of arguments for 'MGET'");
        return Ok(());
    }
    let keys = c.argv[1..].to_vec();
    let alive = db.lock_keys_read(tx, &keys, 1);
    c.add_reply_multibulk_len(keys.len());
    for (i, key) in keys.iter().enumerate() {
        let reply = if alive[i] {
            db.lookup_key(key)
                .and_then(|(t, d)| value::as_string(&db.region, t, d).ok())
        } else {
            None
        };
        match reply {
            Some(s) => c.add_reply_bulk(&s),
            None => c.add_reply(NULLBULK),
        }
    }
    Ok(())
}

pub fn mset_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 || c.argv.len() % 2 == 0 {
        c.add_reply_error("wrong number of arguments for 'MSET'");
        return Ok(());
    }
    let args = c.argv[1..].to_vec();
    db.lock_keys_write(tx, &args, 2)?;
    for pair in args.chunks(2) {
        let v = value::shadow_copy(&db.region, &db.arena, &pair[1]);
        db.set_key(tx, &pair[0], TAG_BYTES, v)?;
    }
    c.add_reply(OK);
    Ok(())
}

pub fn msetnx_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 || c.argv.len() % 2 == 0 {
        c.add_reply_error("wrong number of arguments for 'MSETNX'");
        return Ok(());
    }
    let args = c.argv[1..].to_vec();
    db.lock_keys_write(tx, &args, 2)?;

    // 全有或全无
    for pair in args.chunks(2) {
        if db.lookup_key(&pair[0]).is_some() {
            c.add_reply_longlong(0);
            return Ok(());
        }
    }
    for pair in args.chunks(2) {
        let v = value::shadow_copy(&db.region, &db.arena, &pair[1]);
        db.set_key(tx, &pair[0], TAG_BYTES, v)?;
    }
    c.add_reply_longlong(1);
    Ok(())
}

// --- 原子增减 ---

pub fn incr_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    incr_decr_generic(db, c, tx, 1)
}

pub fn decr_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    incr_decr_generic(db, c, tx, -1)
}

pub fn incrby_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'INCRBY'");
        return Ok(());
    }
    match c.arg_i64(2) {
        Some(by) => incr_decr_generic(db, c, tx, by),
        None => {
            c.add_reply_error("value is not an integer or out of range");
            Ok(())
        }
    }
}

pub fn decrby_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'DECRBY'");
        return Ok(());
    }
    match c.arg_i64(2).and_then(|n| n.checked_neg()) {
        Some(by) => incr_decr_generic(db, c, tx, by),
        None => {
            c.add_reply_error("value is not an integer or out of range");
            Ok(())
        }
    }
}

fn incr_decr_generic(db: &Db, c: &mut Client, tx: &mut dyn Tx, by: i64) -> Result<(), TxError> {
    if c.argv.len() < 2 {
        c.add_reply_error("wrong number of arguments for 'INCR'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let old = match db.lookup_key(&key) {
        None => 0,
        Some((t, d)) => match value::as_int(&db.region, t, d) {
            Ok(v) => v,
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };
    let new = match old.checked_add(by) {
        Some(v) => v,
        None => {
            c.add_reply_error("increment or decrement would overflow");
            return Ok(());
        }
    };
    // 计数器内联存整数，TTL 保留
    db.set_value_keep_ttl(tx, &key, TAG_INT, new as u64)?;
    c.add_reply_longlong(new);
    Ok(())
}

pub fn incrbyfloat_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'INCRBYFLOAT'");
        return Ok(());
    }
    let by: f64 = match std::str::from_utf8(&c.argv[2])
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(v) => v,
        None => {
            c.add_reply_error("value is not a valid float");
            return Ok(());
        }
    };
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let old = match db.lookup_key(&key) {
        None => 0.0,
        Some((t, d)) => match value::as_float(&db.region, t, d) {
            Ok(v) => v,
            Err(e) => {
                reply_value_error(c, &e);
                return Ok(());
            }
        },
    };
    let new = old + by;
    if new.is_nan() || new.is_infinite() {
        c.add_reply_error("increment would produce NaN or Infinity");
        return Ok(());
    }
    db.set_value_keep_ttl(tx, &key, TAG_FLOAT, new.to_bits())?;
    c.add_reply_double(new);
    Ok(())
}
