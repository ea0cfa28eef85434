// src/expire.rs

//! # 过期策略
//!
//! expire 字典与主字典共用 key 字节（set_ref 链接），值是 int64 纳秒
//! 时刻。三条路径：
//! - 写路径惰性：lock_key_write 里顺手 expire_if_needed，到点双删；
//! - 读路径惰性：check_live_key 只入队（有界通道、满即丢）不改状态；
//! - 活跃清扫：后台任务按节拍扫 expire 表的桶，每个事务至多删一个
//!   过期 key，同时消化通道里积压的 key。
//!
//! EXPIRE / TTL / PERSIST 等命令也在这里。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;

use crate::db::{now_ns, Db};
use crate::server::{self, Client};
use crate::txn::{Tx, TxError};

/// 活跃过期清扫循环。ticker 驱动桶扫描，通道驱动读路径上
/// 发现的过期 key。
pub async fn active_expire_loop(db: Arc<Db>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut iv = interval(Duration::from_millis(db.expire_cycle_ms().max(1)));
    let mut cursor: u64 = 0;
    while db.running() {
        tokio::select! {
            Some(key) = rx.recv() => {
                // lock_key_write 内部就是 expire_if_needed：到点双删
                let mut tx = db.pool.undo();
                tx.begin();
                match db.lock_key_write(&mut tx, &key) {
                    Ok(()) => {
                        if let Err(e) = tx.commit() {
                            eprintln!("expired-key drain failed: {}", e);
                        }
                    }
                    Err(e) => eprintln!("expired-key drain failed: {}", e),
                }
            }
            _ = iv.tick() => {
                let mut tx = db.pool.undo();
                if let Err(e) = sweep_cycle(&db, &mut tx, &mut cursor) {
                    eprintln!("active expire cycle failed: {}", e);
                }
            }
        }
    }
}

/// 扫一个 expire 桶；链上发现到点的 key 就删，每个事务至多删一个，
/// 避免长时间霸占分片锁。
fn sweep_cycle(db: &Db, tx: &mut dyn Tx, cursor: &mut u64) -> Result<(), TxError> {
    tx.begin();
    tx.rlock(&db.expire.dict_lock);

    // expire 表正在 rehash 就跳过这一拍；t1 里的 entry 由惰性路径兜底
    if db.expire.mask_of(1) > 0 {
        return tx.commit();
    }

    let mask = db.expire.mask_of(0) as u64;
    let i = *cursor & mask;
    let s = db.expire.shard_of(i);
    db.expire.lock_shard(tx, 0, s);

    let mut e = db.expire.bucket_head(0, i);
    let mut deleted = false;
    let now = now_ns();
    while e != 0 {
        let next = db.expire.entry_next(e);
        let (_, when) = db.expire.entry_value(e);
        if when as i64 <= now {
            let key = db.expire.entry_key(e).to_vec();
            db.dict.lock_key(tx, &key);
            db.delete(tx, &key)?;
            deleted = true;
            break;
        }
        e = next;
    }
    if !deleted {
        // 这个桶检查完了，游标前进
        *cursor = i.wrapping_add(1);
    }
    tx.commit()
}

// ---------- 过期命令 ----------

pub fn expire_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    expire_generic(db, c, tx, true, 1_000_000_000)
}

pub fn expireat_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    expire_generic(db, c, tx, false, 1_000_000_000)
}

pub fn pexpire_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    expire_generic(db, c, tx, true, 1_000_000)
}

pub fn pexpireat_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    expire_generic(db, c, tx, false, 1_000_000)
}

/// EXPIRE 族公共逻辑：base 为当前时刻或 UNIX 零点，unit 是纳秒倍率。
/// 已经落在过去的时刻等价于 DEL。
fn expire_generic(
    db: &Db,
    c: &mut Client,
    tx: &mut dyn Tx,
    from_now: bool,
    unit_ns: i64,
) -> Result<(), TxError> {
    if c.argv.len() != 3 {
        c.add_reply_error("wrong number of arguments for 'EXPIRE'");
        return Ok(());
    }
    let ll: i64 = match std::str::from_utf8(&c.argv[2])
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(v) => v,
        None => {
            c.add_reply_error("value is not an integer or out of range");
            return Ok(());
        }
    };
    let base = if from_now { now_ns() } else { 0 };
    let when = base.saturating_add(ll.saturating_mul(unit_ns));
    let key = c.argv[1].clone();

    db.lock_key_write(tx, &key)?;
    if db.lookup_key(&key).is_none() {
        c.add_reply(server::CZERO);
        return Ok(());
    }

    if when <= now_ns() {
        db.delete(tx, &key)?;
    } else {
        db.set_expire(tx, &key, when)?;
    }
    c.add_reply(server::CONE);
    Ok(())
}

pub fn ttl_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    ttl_generic(db, c, tx, false)
}

pub fn pttl_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    ttl_generic(db, c, tx, true)
}

fn ttl_generic(db: &Db, c: &mut Client, tx: &mut dyn Tx, ms: bool) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'TTL'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    // 读路径：到点未清扫的 key 同样按不存在处理（入队即可，不动状态）
    if !db.lock_key_read(tx, &key) {
        c.add_reply_longlong(-2);
        return Ok(());
    }

    if db.lookup_key(&key).is_none() {
        c.add_reply_longlong(-2);
        return Ok(());
    }

    let expire = db.get_expire(&key);
    if expire < 0 {
        c.add_reply_longlong(-1);
        return Ok(());
    }
    let ttl = (expire - now_ns()).max(0);
    let ttl = if ms {
        (ttl + 500_000) / 1_000_000
    } else {
        (ttl + 500_000_000) / 1_000_000_000
    };
    c.add_reply_longlong(ttl);
    Ok(())
}

pub fn persist_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() != 2 {
        c.add_reply_error("wrong number of arguments for 'PERSIST'");
        return Ok(());
    }
    let key = c.argv[1].clone();
    db.lock_key_write(tx, &key)?;
    if db.lookup_key(&key).is_none() {
        c.add_reply(server::CZERO);
    } else if db.remove_expire(tx, &key)? {
        c.add_reply(server::CONE);
    } else {
        c.add_reply(server::CZERO);
    }
    Ok(())
}
