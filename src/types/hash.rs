// src/types/hash.rs

//! Hash 命令：值是一个嵌套字典（field → 字节串）。
//! 所有写命令都拿外层 key 的分片写锁：无法区分只改内层 field 还是
//! 会替换外层值，所以内层访问不再另外加锁。

use crate::db::Db;
use crate::dict::{Dict, SetOutcome};
use crate::server::{Client, EMPTYMULTIBULK, NULLBULK, OK, WRONGTYPEERR};
use crate::txn::{Tx, TxError};
use crate::value::{self, TAG_BYTES, TAG_HASH};

/// 读路径取嵌套 hash。Ok(None)：key 不存在；Err(())：类型不对，已回复。
fn hash_for_read(db: &Db, c: &mut Client, key: &[u8]) -> Result<Option<Dict>, ()> {
    match db.lookup_key(key) {
        None => Ok(None),
        Some((t, d)) => match value::as_hash(t, d) {
            Ok(off) => Ok(Some(db.nested(off))),
            Err(_) => {
                c.add_reply(WRONGTYPEERR);
                Err(())
            }
        },
    }
}

/// 写路径取嵌套 hash，key 不存在就建一个空 hash 挂上去。
/// None 表示类型不对（已回复）。
fn hash_for_write(
    db: &Db,
    c: &mut Client,
    tx: &mut dyn Tx,
    key: &[u8],
) -> Result<Option<Dict>, TxError> {
    match db.lookup_key(key) {
        None => {
            let d = db.create_nested(tx);
            db.set_key(tx, key, TAG_HASH, d.off())?;
            Ok(Some(d))
        }
        Some((t, v)) => match value::as_hash(t, v) {
            Ok(off) => Ok(Some(db.nested(off))),
            Err(_) => {
                c.add_reply(WRONGTYPEERR);
                Ok(None)
            }
        },
    }
}

/// 在嵌套字典里写一个 field，被覆盖的旧值交回收表
fn hash_set_field(
    db: &Db,
    inner: &Dict,
    tx: &mut dyn Tx,
    field: &[u8],
    val: &[u8],
) -> Result<bool, TxError> {
    let v = value::shadow_copy(&db.region, &db.arena, val);
    match inner.set(tx, field, TAG_BYTES, v)? {
        SetOutcome::Inserted => Ok(true),
        SetOutcome::Updated { old_tag, old_data } => {
            value::reclaim_value(tx, &db.region, &db.arena, old_tag, old_data);
            Ok(false)
        }
    }
}

/// HSET / HMSET 共用：HSET 回新建 field 数，HMSET 回 OK
pub fn hset_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 4 || c.argv.len() % 2 != 0 {
        c.add_reply_error("wrong number of arguments for 'HSET'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match hash_for_write(db, c, tx, &key)? {
        Some(d) => d,
        None => return Ok(()),
    };
    let mut created = 0i64;
    for i in (2..c.argv.len()).step_by(2) {
        let field = c.argv[i].clone();
        let val = c.argv[i + 1].clone();
        if hash_set_field(db, &inner, tx, &field, &val)? {
            created += 1;
        }
    }

    if c.argv[0].eq_ignore_ascii_case(b"hmset") {
        c.add_reply(OK);
    } else {
        c.add_reply_longlong(created);
    }
    Ok(())
}

pub fn hsetnx_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 4 {
        c.add_reply_error("wrong number of arguments for 'HSETNX'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match hash_for_write(db, c, tx, &key)? {
        Some(d) => d,
        None => return Ok(()),
    };
    if inner.get(&c.argv[2]).is_some() {
        c.add_reply_longlong(0);
        return Ok(());
    }
    let field = c.argv[2].clone();
    let val = c.argv[3].clone();
    hash_set_field(db, &inner, tx, &field, &val)?;
    c.add_reply_longlong(1);
    Ok(())
}

pub fn hget_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'HGET'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply(NULLBULK);
        return Ok(());
    }
    let inner = match hash_for_read(db, c, &key) {
        Err(()) => return Ok(()),
        Ok(None) => {
            c.add_reply(NULLBULK);
            return Ok(());
        }
        Ok(Some(d)) => d,
    };
    match inner.get(&c.argv[2]) {
        Some((t, d)) => match value::as_string(&db.region, t, d) {
            Ok(s) => c.add_reply_bulk(&s),
            Err(_) => c.add_reply(NULLBULK),
        },
        None => c.add_reply(NULLBULK),
    }
    Ok(())
}

pub fn hmget_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 {
        c.add_reply_error("wrong number of arguments for 'HMGET'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    let inner = if db.lock_key_read(tx, &key) {
        match hash_for_read(db, c, &key) {
            Err(()) => return Ok(()),
            Ok(d) => d,
        }
    } else {
        None
    };

    c.add_reply_multibulk_len(c.argv.len() - 2);
    for i in 2..c.argv.len() {
        let reply = inner
            .as_ref()
            .and_then(|d| d.get(&c.argv[i]))
            .and_then(|(t, d)| value::as_string(&db.region, t, d).ok());
        match reply {
            Some(s) => c.add_reply_bulk(&s),
            None => c.add_reply(NULLBULK),
        }
    }
    Ok(())
}

pub fn hdel_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 {
        c.add_reply_error("wrong number of arguments for 'HDEL'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match hash_for_read(db, c, &key) {
        Err(()) => return Ok(()),
        Ok(None) => {
            c.add_reply_longlong(0);
            return Ok(());
        }
        Ok(Some(d)) => d,
    };
    let mut deleted = 0i64;
    for i in 2..c.argv.len() {
        let field = c.argv[i].clone();
        if let Some(rm) = inner.delete(tx, &field)? {
            value::reclaim_value(tx, &db.region, &db.arena, rm.vtag, rm.vdata);
            if rm.key_owned {
                tx.reclaim(rm.key_off);
            }
            tx.reclaim(rm.entry);
            deleted += 1;
            // 最后一个 field 删掉，整个 key 一并删除
            if inner.used_total() == 0 {
                db.delete(tx, &key)?;
                break;
            }
        }
    }
    c.add_reply_longlong(deleted);
    Ok(())
}

pub fn hlen_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'HLEN'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match hash_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply_longlong(0),
        Ok(Some(d)) => c.add_reply_longlong(d.used_total() as i64),
    }
    Ok(())
}

pub fn hstrlen_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'HSTRLEN'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match hash_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply_longlong(0),
        Ok(Some(d)) => {
            let n = d
                .get(&c.argv[2])
                .and_then(|(t, v)| value::string_len(&db.region, t, v).ok())
                .unwrap_or(0);
            c.add_reply_longlong(n as i64);
        }
    }
    Ok(())
}

pub fn hexists_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'HEXISTS'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match hash_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply_longlong(0),
        Ok(Some(d)) => {
            c.add_reply_longlong(if d.get(&c.argv[2]).is_some() { 1 } else { 0 })
        }
    }
    Ok(())
}

/// HKEYS / HVALS / HGETALL 共用的扫描
fn hgetall_generic(
    db: &Db,
    c: &mut Client,
    tx: &mut dyn Tx,
    with_keys: bool,
    with_vals: bool,
) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'HGETALL'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply(EMPTYMULTIBULK);
        return Ok(());
    }
    let inner = match hash_for_read(db, c, &key) {
        Err(()) => return Ok(()),
        Ok(None) => {
            c.add_reply(EMPTYMULTIBULK);
            return Ok(());
        }
        Ok(Some(d)) => d,
    };

    let mut pairs = Vec::new();
    inner.for_each_entry(|e| {
        let f = inner.entry_key(e).to_vec();
        let (t, v) = inner.entry_value(e);
        pairs.push((f, t, v));
    });

    let per = usize::from(with_keys) + usize::from(with_vals);
    c.add_reply_multibulk_len(pairs.len() * per);
    for (f, t, v) in pairs {
        if with_keys {
            c.add_reply_bulk(&f);
        }
        if with_vals {
            match value::as_string(&db.region, t, v) {
                Ok(s) => c.add_reply_bulk(&s),
                Err(_) => c.add_reply(NULLBULK),
            }
        }
    }
    Ok(())
}

pub fn hkeys_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    hgetall_generic(db, c, tx, true, false)
}

pub fn hvals_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    hgetall_generic(db, c, tx, false, true)
}

pub fn hgetall_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    hgetall_generic(db, c, tx, true, true)
}
