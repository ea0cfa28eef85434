// src/db.rs

//! # 数据库门面
//!
//! 一个数据库 = 主字典 + expire 字典，根块挂在区头的 db_root 上。
//! 命令层通过这里的锁捆绑进入核心。
//!
//! 全库锁定顺序（固定，有测试盯着）：
//! expire 字典先于主字典；rehashLock → dictLock → 分片锁；
//! 表 0 先于表 1；分片 id 升序。

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::alloc::Arena;
use crate::config::Config;
use crate::dict::{rehash_loop, Dict, SetOutcome};
use crate::region::{PmOff, Region};
use crate::server::{self, Client};
use crate::txn::{Tx, TxError, TxPool};
use crate::value::{self, TAG_INT};

// 根块：{dict:u64, expire:u64}
const ROOT_SIZE: u64 = 16;

// 聚合值的嵌套字典参数：单分片，外层 key 的分片锁已覆盖内层访问
const AGG_INIT_SIZE: u64 = 16;

/// 当前 UNIX 纳秒
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

pub struct Db {
    pub region: Arc<Region>,
    pub arena: Arc<Arena>,
    pub pool: Arc<TxPool>,
    pub dict: Arc<Dict>,
    pub expire: Arc<Dict>,
    expired_send: mpsc::Sender<Vec<u8>>,
    expired_recv: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    running: Arc<AtomicBool>,
    cfg: Config,
}

impl Db {
    /// 打开（或首次建立）数据库。重新打开时依次：区校验 →
    /// 残留事务回滚（TxPool 入池时做）→ mark-sweep 重建空闲链。
    pub fn open<P: AsRef<Path>>(path: P, cfg: Config) -> Result<Arc<Db>> {
        let (region, fresh) =
            Region::open(&path, cfg.region_size).context("failed to open region file")?;
        let region = Arc::new(region);
        let arena = Arc::new(Arena::new(region.clone(), fresh));
        let (pool, recovered) = TxPool::new(&region, &arena);
        if recovered > 0 {
            println!("Rolled back {} interrupted transaction(s)", recovered);
        }

        let (dict, expire) = if fresh {
            let mut tx = pool.undo();
            tx.begin();
            let dict = Dict::create(
                region.clone(),
                arena.clone(),
                &mut tx,
                cfg.dict_init_size,
                cfg.dict_bucket_per_shard,
                true,
            );
            let expire = Dict::create(
                region.clone(),
                arena.clone(),
                &mut tx,
                cfg.expire_init_size,
                cfg.expire_bucket_per_shard,
                false,
            );
            let root = arena.alloc(ROOT_SIZE);
            region.write_u64(root, dict.off());
            region.write_u64(root + 8, expire.off());
            region.persist(root, ROOT_SIZE);
            tx.fake_log(root, ROOT_SIZE);
            tx.commit().map_err(|e| anyhow::anyhow!(e))?;
            // 设根指针之前的所有写入都是影子更新；设完根，库才算存在
            region.set_db_root(root);
            (dict, expire)
        } else {
            let root = region.db_root();
            anyhow::ensure!(root != 0, "region has no database root");
            let dict = Dict::attach(region.clone(), arena.clone(), region.read_u64(root), true);
            let expire = Dict::attach(
                region.clone(),
                arena.clone(),
                region.read_u64(root + 8),
                false,
            );
            (dict, expire)
        };

        let (send, recv) = mpsc::channel(100);
        let db = Arc::new(Db {
            region,
            arena,
            pool,
            dict: Arc::new(dict),
            expire: Arc::new(expire),
            expired_send: send,
            expired_recv: Mutex::new(Some(recv)),
            running: Arc::new(AtomicBool::new(true)),
            cfg,
        });

        if !fresh {
            let swept = db.gc();
            println!("Arena sweep reclaimed {} block(s)", swept);
        }
        Ok(db)
    }

    /// 停机标志（后台任务轮询它）
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// 启动后台任务：两个 rehash 线程 + 一个活跃过期清扫 tokio 任务
    pub fn start_background(self: &Arc<Db>) {
        let interval = Duration::from_millis(self.cfg.rehash_interval_ms);
        for d in [self.dict.clone(), self.expire.clone()] {
            let pool = self.pool.clone();
            let running = self.running.clone();
            std::thread::spawn(move || rehash_loop(d, pool, running, interval));
        }

        let rx = self
            .expired_recv
            .lock()
            .take()
            .expect("active expire task already started");
        let db = self.clone();
        tokio::spawn(crate::expire::active_expire_loop(db, rx));
    }

    pub fn expire_cycle_ms(&self) -> u64 {
        self.cfg.expire_cycle_ms
    }

    // ---------- 锁捆绑 ----------

    pub fn lock_key_write(&self, tx: &mut dyn Tx, key: &[u8]) -> Result<(), TxError> {
        self.expire.lock_key(tx, key);
        self.dict.lock_key(tx, key);
        self.expire_if_needed(tx, key)
    }

    /// 读路径锁 key；返回 false 表示 key 已过期（只入队清扫，不动状态）
    pub fn lock_key_read(&self, tx: &mut dyn Tx, key: &[u8]) -> bool {
        self.expire.lock_key(tx, key);
        self.dict.lock_key(tx, key);
        self.check_live_key(key)
    }

    pub fn lock_keys_write(
        &self,
        tx: &mut dyn Tx,
        keys: &[Vec<u8>],
        stride: usize,
    ) -> Result<(), TxError> {
        self.expire.lock_keys(tx, keys, stride);
        self.dict.lock_keys(tx, keys, stride);
        for i in 0..keys.len() / stride {
            self.expire_if_needed(tx, &keys[i * stride])?;
        }
        Ok(())
    }

    pub fn lock_keys_read(&self, tx: &mut dyn Tx, keys: &[Vec<u8>], stride: usize) -> Vec<bool> {
        self.expire.lock_keys(tx, keys, stride);
        self.dict.lock_keys(tx, keys, stride);
        (0..keys.len() / stride)
            .map(|i| self.check_live_key(&keys[i * stride]))
            .collect()
    }

    /// 全表写锁（FLUSHDB）：四把全局锁按固定顺序拿满
    pub fn lock_tables_write(&self, tx: &mut dyn Tx) {
        tx.wlock(&self.expire.rehash_lock);
        tx.wlock(&self.expire.dict_lock);
        tx.wlock(&self.dict.rehash_lock);
        tx.wlock(&self.dict.dict_lock);
    }

    // ---------- 查找与写入 ----------

    pub fn lookup_key(&self, key: &[u8]) -> Option<(u64, u64)> {
        self.dict.get(key)
    }

    /// 写入 key（同时抹掉旧的过期时间）。被替换的旧值交回收表。
    pub fn set_key(&self, tx: &mut dyn Tx, key: &[u8], vtag: u64, vdata: u64) -> Result<bool, TxError> {
        self.remove_expire(tx, key)?;
        match self.dict.set(tx, key, vtag, vdata)? {
            SetOutcome::Inserted => Ok(true),
            SetOutcome::Updated { old_tag, old_data } => {
                value::reclaim_value(tx, &self.region, &self.arena, old_tag, old_data);
                Ok(false)
            }
        }
    }

    /// 覆盖值但保留过期时间（INCR 族）
    pub fn set_value_keep_ttl(
        &self,
        tx: &mut dyn Tx,
        key: &[u8],
        vtag: u64,
        vdata: u64,
    ) -> Result<(), TxError> {
        if let SetOutcome::Updated { old_tag, old_data } = self.dict.set(tx, key, vtag, vdata)? {
            value::reclaim_value(tx, &self.region, &self.arena, old_tag, old_data);
        }
        Ok(())
    }

    /// 两边一起删。返回主字典里是否真的删了东西。
    pub fn delete(&self, tx: &mut dyn Tx, key: &[u8]) -> Result<bool, TxError> {
        self.remove_expire(tx, key)?;
        match self.dict.delete(tx, key)? {
            Some(rm) => {
                value::reclaim_value(tx, &self.region, &self.arena, rm.vtag, rm.vdata);
                if rm.key_owned {
                    tx.reclaim(rm.key_off);
                }
                tx.reclaim(rm.entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 挂接一个聚合值的嵌套字典
    pub fn nested(&self, off: PmOff) -> Dict {
        Dict::attach(self.region.clone(), self.arena.clone(), off, true)
    }

    /// 新建一个聚合值的嵌套字典
    pub fn create_nested(&self, tx: &mut dyn Tx) -> Dict {
        Dict::create(
            self.region.clone(),
            self.arena.clone(),
            tx,
            AGG_INIT_SIZE,
            AGG_INIT_SIZE,
            true,
        )
    }

    // ---------- 过期 ----------

    /// 读 key 的过期时刻（纳秒）；无过期返回 -1
    pub fn get_expire(&self, key: &[u8]) -> i64 {
        match self.expire.get(key) {
            Some((_, when)) => when as i64,
            None => -1,
        }
    }

    /// 设置过期时刻。key 必须存在（调用方已查过）；expire 字典直接
    /// 链接主 entry 的 key 块，两边 key 指向同一份字节。
    pub fn set_expire(&self, tx: &mut dyn Tx, key: &[u8], when_ns: i64) -> Result<(), TxError> {
        let f = self.dict.find(key);
        if f.entry == 0 {
            panic!("set expire on non-existing key");
        }
        let (k_off, k_len) = self.dict.entry_key_ref(f.entry);
        self.expire
            .set_ref(tx, k_off, k_len, TAG_INT, when_ns as u64)?;
        Ok(())
    }

    pub fn remove_expire(&self, tx: &mut dyn Tx, key: &[u8]) -> Result<bool, TxError> {
        match self.expire.delete(tx, key)? {
            Some(rm) => {
                // expire 字典不拥有 key 字节（key_owned = false），只回收 entry
                debug_assert!(!rm.key_owned);
                tx.reclaim(rm.entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 写路径的惰性过期：到点就双删
    pub fn expire_if_needed(&self, tx: &mut dyn Tx, key: &[u8]) -> Result<(), TxError> {
        let when = self.get_expire(key);
        if when < 0 || now_ns() < when {
            return Ok(());
        }
        self.delete(tx, key)?;
        Ok(())
    }

    /// 读路径的惰性过期：不可变更状态，入队交给清扫任务，按不存在处理
    pub fn check_live_key(&self, key: &[u8]) -> bool {
        let when = self.get_expire(key);
        if when < 0 || now_ns() < when {
            return true;
        }
        // 有界通道，满了就丢，清扫任务迟早会扫到它
        let _ = self.expired_send.try_send(key.to_vec());
        false
    }

    pub fn random_live_key(&self) -> Option<Vec<u8>> {
        loop {
            match self.dict.random_key() {
                None => return None,
                Some(k) => {
                    if self.check_live_key(&k) {
                        return Some(k);
                    }
                }
            }
        }
    }

    // ---------- mark-sweep ----------

    /// 停机世界式回收：从根收集活跃块，重建 arena 空闲链。
    /// 只在启动（无并发事务）时调用。
    pub fn gc(&self) -> usize {
        let mut live = HashSet::new();
        let root = self.region.db_root();
        live.insert(root);

        {
            let mut mark = |off: PmOff| {
                live.insert(off);
            };
            self.dict.collect_live(&mut mark);
            self.expire.collect_live(&mut mark);
        }
        let mut values = Vec::new();
        self.dict
            .for_each_entry(|e| values.push(self.dict.entry_value(e)));
        for (tag, data) in values {
            let mut mark = |off: PmOff| {
                live.insert(off);
            };
            value::collect_live_value(&self.region, &self.arena, tag, data, &mut mark);
        }

        self.arena.sweep(&live)
    }
}

// ---------- keyspace 命令 ----------

pub fn exists_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 2 {
        c.add_reply_error("wrong number of arguments for 'EXISTS'");
        return Ok(());
    }
    let keys = c.argv[1..].to_vec();
    let alive = db.lock_keys_read(tx, &keys, 1);
    let mut count = 0i64;
    for (i, key) in keys.iter().enumerate() {
        if alive[i] && db.lookup_key(key).is_some() {
            count += 1;
        }
    }
    c.add_reply_longlong(count);
    Ok(())
}

pub fn del_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    if c.argv.len() < 2 {
        c.add_reply_error("wrong number of arguments for 'DEL'");
        return Ok(());
    }
    let keys = c.argv[1..].to_vec();
    db.lock_keys_write(tx, &keys, 1)?;
    let mut count = 0i64;
    for key in &keys {
        if db.delete(tx, key)? {
            count += 1;
        }
    }
    c.add_reply_longlong(count);
    Ok(())
}

pub fn dbsize_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    db.dict.lock_all_keys(tx);
    c.add_reply_longlong(db.dict.used_total() as i64);
    Ok(())
}

pub fn flushdb_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    db.lock_tables_write(tx);
    db.expire.empty(tx)?;
    db.dict.empty(tx)?;
    c.add_reply(server::OK);
    Ok(())
}

pub fn select_command(_db: &Db, c: &mut Client, _tx: &mut dyn Tx) -> Result<(), TxError> {
    // 单库实现：任何 SELECT 都落在同一个库上
    c.add_reply(server::OK);
    Ok(())
}

pub fn randomkey_command(db: &Db, c: &mut Client, tx: &mut dyn Tx) -> Result<(), TxError> {
    db.expire.lock_all_keys(tx);
    db.dict.lock_all_keys(tx);
    match db.random_live_key() {
        Some(k) => c.add_reply_bulk(&k),
        None => c.add_reply(server::NULLBULK),
    }
    Ok(())
}
