// src/types/set.rs

//! Set 命令：值是一个嵌套字典，member 作 key、值标签为 None。
//! 锁的约定同 hash：外层 key 的分片锁覆盖内层全部访问。

use crate::db::Db;
use crate::dict::{Dict, SetOutcome};
use crate::server::{Client, EMPTYMULTIBULK, NULLBULK, WRONGTYPEERR};
use crate::txn::{Tx, TxError};
use crate::value::{self, TAG_NONE, TAG_SET};

fn set_for_read(db: &Db, c: &mut Client, key: &[u8]) -> Result<Option<Dict>, ()> {
    match db.lookup_key(key) {
        None => Ok(None),
        Some((t, d)) => match value::as_set(t, d) {
            Ok(off) => Ok(Some(db.nested(off))),
            Err(_) => {
                c.add_reply(WRONGTYPEERR);
                Err(())
            }
        },
    }
}

pub fn sadd_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 {
        c.add_reply_error("wrong number of arguments for 'SADD'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match db.lookup_key(&key) {
        None => {
            let d = db.create_nested(tx);
            db.set_key(tx, &key, TAG_SET, d.off())?;
            d
        }
        Some((t, v)) => match value::as_set(t, v) {
            Ok(off) => db.nested(off),
            Err(_) => {
                c.add_reply(WRONGTYPEERR);
                return Ok(());
            }
        },
    };

    let mut added = 0i64;
    for i in 2..c.argv.len() {
        let member = c.argv[i].clone();
        if let SetOutcome::Inserted = inner.set(tx, &member, TAG_NONE, 0)? {
            added += 1;
        }
    }
    c.add_reply_longlong(added);
    Ok(())
}

pub fn srem_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 3 {
        c.add_reply_error("wrong number of arguments for 'SREM'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match set_for_read(db, c, &key) {
        Err(()) => return Ok(()),
        Ok(None) => {
            c.add_reply_longlong(0);
            return Ok(());
        }
        Ok(Some(d)) => d,
    };
    let mut removed = 0i64;
    for i in 2..c.argv.len() {
        let member = c.argv[i].clone();
        if let Some(rm) = inner.delete(tx, &member)? {
            if rm.key_owned {
                tx.reclaim(rm.key_off);
            }
            tx.reclaim(rm.entry);
            removed += 1;
            // 集合空了就把整个 key 删掉
            if inner.used_total() == 0 {
                db.delete(tx, &key)?;
                break;
            }
        }
    }
    c.add_reply_longlong(removed);
    Ok(())
}

pub fn scard_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'SCARD'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match set_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply_longlong(0),
        Ok(Some(d)) => c.add_reply_longlong(d.used_total() as i64),
    }
    Ok(())
}

pub fn sismember_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'SISMEMBER'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(0);
        return Ok(());
    }
    match set_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply_longlong(0),
        Ok(Some(d)) => {
            c.add_reply_longlong(if d.get(&c.argv[2]).is_some() { 1 } else { 0 })
        }
    }
    Ok(())
}

pub fn smembers_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'SMEMBERS'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply(EMPTYMULTIBULK);
        return Ok(());
    }
    match set_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply(EMPTYMULTIBULK),
        Ok(Some(d)) => {
            let mut members = Vec::new();
            d.for_each_entry(|e| members.push(d.entry_key(e).to_vec()));
            c.add_reply_multibulk_len(members.len());
            for m in members {
                c.add_reply_bulk(&m);
            }
        }
    }
    Ok(())
}

pub fn spop_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'SPOP'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;

    let inner = match set_for_read(db, c, &key) {
        Err(()) => return Ok(()),
        Ok(None) => {
            c.add_reply(NULLBULK);
            return Ok(());
        }
        Ok(Some(d)) => d,
    };
    match inner.random_key() {
        None => c.add_reply(NULLBULK),
        Some(member) => {
            if let Some(rm) = inner.delete(tx, &member)? {
                if rm.key_owned {
                    tx.reclaim(rm.key_off);
                }
                tx.reclaim(rm.entry);
            }
            if inner.used_total() == 0 {
                db.delete(tx, &key)?;
            }
            c.add_reply_bulk(&member);
        }
    }
    Ok(())
}

pub fn srandmember_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'SRANDMEMBER'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    if !db.lock_key_read(tx, &key) {
        c.add_reply(NULLBULK);
        return Ok(());
    }
    match set_for_read(db, c, &key) {
        Err(()) => {}
        Ok(None) => c.add_reply(NULLBULK),
        Ok(Some(d)) => match d.random_key() {
            Some(m) => c.add_reply_bulk(&m),
            None => c.add_reply(NULLBULK),
        },
    }
    Ok(())
}
