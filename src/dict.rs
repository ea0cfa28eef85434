// src/dict.rs

//! # 分片锁持久哈希字典
//!
//! 数据库的核心结构。两张表：t0 常驻，t1 只在 rehash 期间存在；
//! 每张表一组桶（entry 链头偏移）、每分片一个 used 计数和一把读写锁。
//! rehash 由后台任务一次搬一个 entry，读写路径在 rehash 期间同时扫两张表，
//! 插入一律落在 t1，因此任何时刻一个 key 恰好在一张表里。
//!
//! 锁定顺序（全局固定）：rehashLock → dictLock → 表 0 分片升序 → 表 1 分片升序。
//!
//! 持久布局（arena 块内，全部小端）：
//! ```text
//! dict 头 72B: init_size:u64  bucket_per_shard:u64  rehash_idx:i64
//!              tab0{bucket:u64 used:u64 mask:i64}  tab1{同}
//! entry 40B:   key:u64  key_len:u64  vtag:u64  vdata:u64  next:u64
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

use crate::alloc::Arena;
use crate::region::{PmOff, Region};
use crate::txn::{ShardLock, Tx, TxError, TxPool};

/// 缩容阈值：used 低于 size/RATIO 且 size 大于初始值时收缩
pub const RATIO: u64 = 2;

// dict 头字段偏移
const D_INIT: u64 = 0;
const D_BPS: u64 = 8;
const D_REHASH: u64 = 16;
const D_TAB: [u64; 2] = [24, 48];
const TAB_BUCKET: u64 = 0;
const TAB_USED: u64 = 8;
const TAB_MASK: u64 = 16;
pub(crate) const DICT_HDR_SIZE: u64 = 72;

// entry 字段偏移
const E_KEY: u64 = 0;
const E_KLEN: u64 = 8;
const E_VTAG: u64 = 16;
const E_VDATA: u64 = 24;
const E_NEXT: u64 = 32;
pub(crate) const ENTRY_SIZE: u64 = 40;

/// FNV-1a 32 位：对同样的字节序列跨进程、跨重启稳定
fn fnv1a32(key: &[u8]) -> u32 {
    let mut h: u32 = 0x811c9dc5;
    for &b in key {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

fn next_power(mut s1: u64, s2: u64) -> u64 {
    if s1 < 1 {
        s1 = 1;
    }
    while s1 < s2 {
        s1 *= 2;
    }
    s1
}

/// find 的结果：命中时 `entry` 非零，`prev` 是链上前驱（头结点时为 0）
pub struct Find {
    pub t: usize,
    pub bucket: u64,
    pub prev: PmOff,
    pub entry: PmOff,
}

/// set 的结果：覆盖时带回旧值标签/载荷，交由上层安排回收
pub enum SetOutcome {
    Inserted,
    Updated { old_tag: u64, old_data: u64 },
}

/// delete 摘下的 entry，交由上层安排回收
pub struct Removed {
    pub entry: PmOff,
    pub key_off: PmOff,
    pub key_len: u64,
    pub vtag: u64,
    pub vdata: u64,
    pub key_owned: bool,
}

/// 检视钩子返回的表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictStats {
    pub size0: u64,
    pub size1: u64,
    pub rehash_idx: i64,
    pub used: u64,
}

enum KeySrc<'a> {
    /// 易失 key，插入时做影子拷贝进 arena
    Copy(&'a [u8]),
    /// 已在区内的 key（expire 字典与主字典共享 key 块）
    Ref(PmOff, u64),
}

pub struct Dict {
    region: Arc<Region>,
    arena: Arc<Arena>,
    off: PmOff,
    pub(crate) dict_lock: Arc<ShardLock>,
    pub(crate) rehash_lock: Arc<ShardLock>,
    // 每表的分片锁；向量只在 dictLock 写锁下替换，读取方必持 dictLock 读锁
    shards: [RwLock<Vec<Arc<ShardLock>>>; 2],
    owns_keys: bool,
}

impl Dict {
    /// 新建字典。新块全部是影子写入（先持久化、后挂到可达图），
    /// 事务只需 fake_log 维持类型约定。
    pub fn create(
        region: Arc<Region>,
        arena: Arc<Arena>,
        tx: &mut dyn Tx,
        init_size: u64,
        bucket_per_shard: u64,
        owns_keys: bool,
    ) -> Dict {
        let init = next_power(1, init_size);
        // 分片宽度取 2 的幂并整除表大小，shard 序号才不会越界
        let bps = bucket_per_shard.clamp(1, init).next_power_of_two().min(init);

        let off = arena.alloc(DICT_HDR_SIZE);
        region.write_u64(off + D_INIT, init);
        region.write_u64(off + D_BPS, bps);
        region.write_i64(off + D_REHASH, -1);

        let d = Dict {
            region: region.clone(),
            arena,
            off,
            dict_lock: Arc::new(ShardLock::new()),
            rehash_lock: Arc::new(ShardLock::new()),
            shards: [RwLock::new(Vec::new()), RwLock::new(Vec::new())],
            owns_keys,
        };
        let (b0, u0) = d.make_table(init);
        d.write_table(0, b0, u0, init as i64 - 1);
        d.write_table(1, 0, 0, -1);
        region.persist(off, DICT_HDR_SIZE);
        tx.fake_log(off, DICT_HDR_SIZE);

        *d.shards[0].write() = Self::make_locks(d.shard_count(init));
        d
    }

    /// 重新打开后挂接一个已存在的字典，按表大小重建分片锁
    pub fn attach(region: Arc<Region>, arena: Arc<Arena>, off: PmOff, owns_keys: bool) -> Dict {
        let d = Dict {
            region,
            arena,
            off,
            dict_lock: Arc::new(ShardLock::new()),
            rehash_lock: Arc::new(ShardLock::new()),
            shards: [RwLock::new(Vec::new()), RwLock::new(Vec::new())],
            owns_keys,
        };
        for t in 0..2 {
            let size = d.size_of(t);
            if size > 0 {
                *d.shards[t].write() = Self::make_locks(d.shard_count(size));
            }
        }
        d
    }

    pub fn off(&self) -> PmOff {
        self.off
    }

    fn make_locks(n: u64) -> Vec<Arc<ShardLock>> {
        (0..n).map(|_| Arc::new(ShardLock::new())).collect()
    }

    // ---------- 持久头访问 ----------

    fn init_size(&self) -> u64 {
        self.region.read_u64(self.off + D_INIT)
    }

    fn bucket_per_shard(&self) -> u64 {
        self.region.read_u64(self.off + D_BPS)
    }

    pub fn rehash_idx(&self) -> i64 {
        self.region.read_i64(self.off + D_REHASH)
    }

    fn tab(&self, t: usize) -> u64 {
        self.off + D_TAB[t]
    }

    fn bucket_arr(&self, t: usize) -> PmOff {
        self.region.read_u64(self.tab(t) + TAB_BUCKET)
    }

    fn used_arr(&self, t: usize) -> PmOff {
        self.region.read_u64(self.tab(t) + TAB_USED)
    }

    pub(crate) fn mask_of(&self, t: usize) -> i64 {
        self.region.read_i64(self.tab(t) + TAB_MASK)
    }

    fn size_of(&self, t: usize) -> u64 {
        (self.mask_of(t) + 1) as u64
    }

    fn write_table(&self, t: usize, bucket: PmOff, used: PmOff, mask: i64) {
        self.region.write_u64(self.tab(t) + TAB_BUCKET, bucket);
        self.region.write_u64(self.tab(t) + TAB_USED, used);
        self.region.write_i64(self.tab(t) + TAB_MASK, mask);
    }

    /// 分配一张 size 桶的空表（桶 + used 全零，已持久化）
    fn make_table(&self, size: u64) -> (PmOff, PmOff) {
        let bucket = self.arena.alloc(size * 8);
        let used = self.arena.alloc(self.shard_count(size) * 8);
        (bucket, used)
    }

    pub(crate) fn shard_of(&self, b: u64) -> u64 {
        b / self.bucket_per_shard()
    }

    fn shard_count(&self, size: u64) -> u64 {
        (size / self.bucket_per_shard()).max(1)
    }

    pub(crate) fn hash_key(&self, key: &[u8]) -> u64 {
        fnv1a32(key) as u64
    }

    // ---------- entry 访问 ----------

    pub(crate) fn entry_key(&self, e: PmOff) -> &[u8] {
        let off = self.region.read_u64(e + E_KEY);
        let len = self.region.read_u64(e + E_KLEN);
        self.region.bytes(off, len as usize)
    }

    pub(crate) fn entry_key_ref(&self, e: PmOff) -> (PmOff, u64) {
        (
            self.region.read_u64(e + E_KEY),
            self.region.read_u64(e + E_KLEN),
        )
    }

    pub(crate) fn entry_value(&self, e: PmOff) -> (u64, u64) {
        (
            self.region.read_u64(e + E_VTAG),
            self.region.read_u64(e + E_VDATA),
        )
    }

    pub(crate) fn entry_next(&self, e: PmOff) -> PmOff {
        self.region.read_u64(e + E_NEXT)
    }

    pub(crate) fn bucket_head(&self, t: usize, b: u64) -> PmOff {
        self.region.read_u64(self.bucket_arr(t) + b * 8)
    }

    // ---------- 查找 ----------

    /// 扫两张表找 key。调用方必须已按意图持有对应分片锁。
    pub fn find(&self, key: &[u8]) -> Find {
        let h = self.hash_key(key);
        let maxt = if self.mask_of(1) > 0 { 1 } else { 0 };
        let mut b = 0;
        for t in 0..=maxt {
            b = h & self.mask_of(t) as u64;
            let mut prev = 0;
            let mut cur = self.bucket_head(t, b);
            while cur != 0 {
                if self.entry_key(cur) == key {
                    return Find {
                        t,
                        bucket: b,
                        prev,
                        entry: cur,
                    };
                }
                prev = cur;
                cur = self.entry_next(cur);
            }
        }
        Find {
            t: maxt,
            bucket: b,
            prev: 0,
            entry: 0,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<(u64, u64)> {
        let f = self.find(key);
        if f.entry != 0 {
            Some(self.entry_value(f.entry))
        } else {
            None
        }
    }

    // ---------- 写入 ----------

    /// 插入或覆盖。key 从易失缓冲拷贝进 arena（影子拷贝）。
    /// 新 value 必须已经持久（内联标量或调用方备好的 arena 块）。
    pub fn set(
        &self,
        tx: &mut dyn Tx,
        key: &[u8],
        vtag: u64,
        vdata: u64,
    ) -> Result<SetOutcome, TxError> {
        self.set_impl(tx, key, KeySrc::Copy(key), vtag, vdata)
    }

    /// 同 set，但直接链接一个已在区内的 key 块（不拷贝、不拥有）。
    pub fn set_ref(
        &self,
        tx: &mut dyn Tx,
        key_off: PmOff,
        key_len: u64,
        vtag: u64,
        vdata: u64,
    ) -> Result<SetOutcome, TxError> {
        let key = self.region.bytes(key_off, key_len as usize).to_vec();
        self.set_impl(tx, &key, KeySrc::Ref(key_off, key_len), vtag, vdata)
    }

    fn set_impl(
        &self,
        tx: &mut dyn Tx,
        key: &[u8],
        src: KeySrc<'_>,
        vtag: u64,
        vdata: u64,
    ) -> Result<SetOutcome, TxError> {
        let f = self.find(key);

        if f.entry != 0 {
            let (old_tag, old_data) = self.entry_value(f.entry);
            tx.log(f.entry + E_VTAG, 16)?;
            self.region.write_u64(f.entry + E_VTAG, vtag);
            self.region.write_u64(f.entry + E_VDATA, vdata);
            return Ok(SetOutcome::Updated { old_tag, old_data });
        }

        // 影子更新：新 entry（连同 key 拷贝）先整个持久化，
        // 再在日志保护下挂进桶链
        let (k_off, k_len) = match src {
            KeySrc::Copy(k) => {
                let off = self.arena.alloc(k.len() as u64);
                self.region.write_bytes(off, k);
                self.region.persist(off, k.len() as u64);
                (off, k.len() as u64)
            }
            KeySrc::Ref(off, len) => (off, len),
        };
        let e = self.arena.alloc(ENTRY_SIZE);
        let head = self.bucket_head(f.t, f.bucket);
        self.region.write_u64(e + E_KEY, k_off);
        self.region.write_u64(e + E_KLEN, k_len);
        self.region.write_u64(e + E_VTAG, vtag);
        self.region.write_u64(e + E_VDATA, vdata);
        self.region.write_u64(e + E_NEXT, head);
        self.region.persist(e, ENTRY_SIZE);
        tx.fake_log(e, ENTRY_SIZE);

        let slot = self.bucket_arr(f.t) + f.bucket * 8;
        tx.log(slot, 8)?;
        self.region.write_u64(slot, e);

        let s = self.shard_of(f.bucket);
        let uslot = self.used_arr(f.t) + s * 8;
        tx.log(uslot, 8)?;
        self.region.write_u64(uslot, self.region.read_u64(uslot) + 1);
        Ok(SetOutcome::Inserted)
    }

    /// 摘链删除。返回被摘的 entry 供上层回收；不存在返回 None。
    pub fn delete(&self, tx: &mut dyn Tx, key: &[u8]) -> Result<Option<Removed>, TxError> {
        let f = self.find(key);
        if f.entry == 0 {
            return Ok(None);
        }

        let next = self.entry_next(f.entry);
        if f.prev != 0 {
            tx.log(f.prev + E_NEXT, 8)?;
            self.region.write_u64(f.prev + E_NEXT, next);
        } else {
            let slot = self.bucket_arr(f.t) + f.bucket * 8;
            tx.log(slot, 8)?;
            self.region.write_u64(slot, next);
        }

        let s = self.shard_of(f.bucket);
        let uslot = self.used_arr(f.t) + s * 8;
        tx.log(uslot, 8)?;
        self.region.write_u64(uslot, self.region.read_u64(uslot) - 1);

        let (key_off, key_len) = self.entry_key_ref(f.entry);
        let (vtag, vdata) = self.entry_value(f.entry);
        Ok(Some(Removed {
            entry: f.entry,
            key_off,
            key_len,
            vtag,
            vdata,
            key_owned: self.owns_keys,
        }))
    }

    /// used 总数。读取方须持有足够的锁（单 key 路径的分片锁不够，
    /// 需 lock_all_keys 或 dictLock 写锁，写锁隔绝一切遵守锁序的操作）。
    pub fn used_total(&self) -> u64 {
        let mut total = 0;
        for t in 0..2 {
            let size = self.size_of(t);
            if size > 0 {
                let arr = self.used_arr(t);
                for s in 0..self.shard_count(size) {
                    total += self.region.read_u64(arr + s * 8);
                }
            }
        }
        total
    }

    // ---------- 锁 ----------

    pub(crate) fn lock_shard(&self, tx: &mut dyn Tx, t: usize, s: u64) {
        let m = self.shards[t].read()[s as usize].clone();
        tx.lock(&m);
    }

    fn wlock_shard(&self, tx: &mut dyn Tx, t: usize, s: u64) {
        let m = self.shards[t].read()[s as usize].clone();
        tx.wlock(&m);
    }

    fn find_shard(&self, t: usize, key: &[u8]) -> u64 {
        self.shard_of(self.hash_key(key) & self.mask_of(t) as u64)
    }

    /// 锁单个 key 涉及的分片（t0，以及 rehash 期间的 t1），升序
    pub fn lock_key(&self, tx: &mut dyn Tx, key: &[u8]) {
        tx.rlock(&self.dict_lock);
        let maxt = if self.mask_of(1) > 0 { 1 } else { 0 };
        for t in 0..=maxt {
            let s = self.find_shard(t, key);
            self.lock_shard(tx, t, s);
        }
    }

    /// 锁一组 key 涉及的分片。stride 用来跳过 MSET 风格的非 key 参数。
    /// 同一张表内分片升序、去重后获取，防止死锁与重入。
    pub fn lock_keys(&self, tx: &mut dyn Tx, keys: &[Vec<u8>], stride: usize) {
        tx.rlock(&self.dict_lock);
        let maxt = if self.mask_of(1) > 0 { 1 } else { 0 };
        let n = keys.len() / stride;
        let mut shards = Vec::with_capacity(n);
        for t in 0..=maxt {
            shards.clear();
            for i in 0..n {
                shards.push(self.find_shard(t, &keys[i * stride]));
            }
            shards.sort_unstable();
            let mut prev = u64::MAX;
            for &s in &shards {
                if s != prev {
                    self.lock_shard(tx, t, s);
                    prev = s;
                }
            }
        }
    }

    /// 锁全部分片（DBSIZE / RANDOMKEY）
    pub fn lock_all_keys(&self, tx: &mut dyn Tx) {
        tx.rlock(&self.dict_lock);
        let maxt = if self.mask_of(1) > 0 { 1 } else { 0 };
        for t in 0..=maxt {
            for s in 0..self.shard_count(self.size_of(t)) {
                self.lock_shard(tx, t, s);
            }
        }
    }

    // ---------- rehash 与 resize ----------

    /// 一个 rehash 微步，自带事务边界。返回 rehash 是否在进行中
    /// （驱动循环据此决定要不要睡眠）。
    pub fn rehash_step(&self, tx: &mut dyn Tx) -> Result<bool, TxError> {
        tx.begin();
        tx.wlock(&self.rehash_lock);
        let busy = self.rehash_step_locked(tx)?;
        tx.commit()?;
        Ok(busy)
    }

    fn rehash_step_locked(&self, tx: &mut dyn Tx) -> Result<bool, TxError> {
        let idx = self.rehash_idx();
        if idx < 0 {
            // 空闲：检查是否需要调整表大小
            return Ok(self.resize_if_needed(tx)? > 0);
        }

        let size0 = self.size_of(0);
        if (idx as u64) < size0 {
            // 搬一个 entry
            tx.rlock(&self.dict_lock);
            let i0 = idx as u64;
            let s0 = self.shard_of(i0);
            self.wlock_shard(tx, 0, s0);

            let e = self.bucket_head(0, i0);
            if e == 0 {
                tx.log(self.off + D_REHASH, 8)?;
                self.region.write_i64(self.off + D_REHASH, idx + 1);
            } else {
                let i1 = self.hash_key(self.entry_key(e)) & self.mask_of(1) as u64;
                let s1 = self.shard_of(i1);
                self.wlock_shard(tx, 1, s1);

                let b0 = self.bucket_arr(0) + i0 * 8;
                let b1 = self.bucket_arr(1) + i1 * 8;
                let u0 = self.used_arr(0) + s0 * 8;
                let u1 = self.used_arr(1) + s1 * 8;
                tx.log(e + E_NEXT, 8)?;
                tx.log(b0, 8)?;
                tx.log(b1, 8)?;
                tx.log(u0, 8)?;
                tx.log(u1, 8)?;

                let next = self.entry_next(e);
                self.region.write_u64(e + E_NEXT, self.region.read_u64(b1));
                self.region.write_u64(b0, next);
                self.region.write_u64(u0, self.region.read_u64(u0) - 1);
                self.region.write_u64(b1, e);
                self.region.write_u64(u1, self.region.read_u64(u1) + 1);
            }
            return Ok(true);
        }

        // 搬完了：t0 := t1，重置 t1
        tx.wlock(&self.dict_lock);
        tx.log(self.off, DICT_HDR_SIZE)?;
        tx.reclaim(self.bucket_arr(0));
        tx.reclaim(self.used_arr(0));
        self.write_table(
            0,
            self.bucket_arr(1),
            self.used_arr(1),
            self.mask_of(1),
        );
        self.write_table(1, 0, 0, -1);
        self.region.write_i64(self.off + D_REHASH, -1);

        let t1 = std::mem::take(&mut *self.shards[1].write());
        *self.shards[0].write() = t1;
        Ok(false)
    }

    /// 在 dictLock 写锁下检查并启动 resize。返回新 t1 的大小（0 = 不需要）。
    fn resize_if_needed(&self, tx: &mut dyn Tx) -> Result<u64, TxError> {
        tx.wlock(&self.dict_lock);

        // dictLock 写锁隔绝全部常规操作，读 used 不再需要分片锁
        let size0 = self.size_of(0);
        let used = self.used_total();
        let init = self.init_size();

        let grow = used > size0;
        let shrink = size0 > init && used < size0 / RATIO;
        if !grow && !shrink {
            return Ok(0);
        }

        let s = next_power(init, used);
        tx.log(self.off, DICT_HDR_SIZE)?;
        let (bucket, usedarr) = self.make_table(s);
        self.write_table(1, bucket, usedarr, s as i64 - 1);
        self.region.write_i64(self.off + D_REHASH, 0);

        *self.shards[1].write() = Self::make_locks(self.shard_count(s));
        Ok(s)
    }

    /// 整表清空（FLUSHDB）。调用方持有 dictLock 写锁。
    /// 旧表与其全部 entry 变成不可达垃圾，由启动期 mark-sweep 找回。
    pub fn empty(&self, tx: &mut dyn Tx) -> Result<(), TxError> {
        tx.log(self.off, DICT_HDR_SIZE)?;
        let init = self.init_size();
        let (b0, u0) = self.make_table(init);
        self.write_table(0, b0, u0, init as i64 - 1);
        self.write_table(1, 0, 0, -1);
        self.region.write_i64(self.off + D_REHASH, -1);

        *self.shards[0].write() = Self::make_locks(self.shard_count(init));
        self.shards[1].write().clear();
        Ok(())
    }

    // ---------- 随机与遍历 ----------

    /// 随机挑一个 key（RANDOMKEY）。调用方已 lock_all_keys。
    pub fn random_key(&self) -> Option<Vec<u8>> {
        if self.used_total() == 0 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let idx = self.rehash_idx();
        let mask0 = self.mask_of(0);
        let mut e = 0;
        while e == 0 {
            if idx >= 0 {
                let mask1 = self.mask_of(1);
                let span = (mask0 + mask1 + 2 - idx) as u64;
                let h = idx as u64 + rng.gen_range(0..span);
                e = if h > mask0 as u64 {
                    self.bucket_head(1, h - mask0 as u64 - 1)
                } else {
                    self.bucket_head(0, h)
                };
            } else {
                e = self.bucket_head(0, rng.gen_range(0..=mask0 as u64));
            }
        }

        // 非空桶里再均匀挑一个
        let mut len = 0;
        let mut cur = e;
        while cur != 0 {
            cur = self.entry_next(cur);
            len += 1;
        }
        for _ in 0..rng.gen_range(0..len) {
            e = self.entry_next(e);
        }
        Some(self.entry_key(e).to_vec())
    }

    /// 遍历两张表的所有 entry（聚合值读取、回收、sweep 活跃集）
    pub fn for_each_entry<F: FnMut(PmOff)>(&self, mut f: F) {
        for t in 0..2 {
            let size = self.size_of(t);
            for b in 0..size {
                let mut cur = self.bucket_head(t, b);
                while cur != 0 {
                    let next = self.entry_next(cur);
                    f(cur);
                    cur = next;
                }
            }
        }
    }

    /// 把整个字典（头、表、entry、自有 key）交给事务的回收表。
    /// value 块由上层先行处理。
    pub fn reclaim_structure(&self, tx: &mut dyn Tx) {
        self.for_each_entry(|e| {
            if self.owns_keys {
                let (k, _) = self.entry_key_ref(e);
                tx.reclaim(k);
            }
            tx.reclaim(e);
        });
        for t in 0..2 {
            if self.size_of(t) > 0 {
                tx.reclaim(self.bucket_arr(t));
                tx.reclaim(self.used_arr(t));
            }
        }
        tx.reclaim(self.off);
    }

    /// sweep 活跃集：收集本字典直接拥有的所有载荷偏移
    pub fn collect_live<F: FnMut(PmOff)>(&self, mark: &mut F) {
        mark(self.off);
        for t in 0..2 {
            if self.size_of(t) > 0 {
                mark(self.bucket_arr(t));
                mark(self.used_arr(t));
            }
        }
        self.for_each_entry(|e| {
            mark(e);
            if self.owns_keys {
                let (k, _) = self.entry_key_ref(e);
                mark(k);
            }
        });
    }

    /// 检视钩子：表大小、rehash 游标与 used 总数
    pub fn stats(&self, tx: &mut dyn Tx) -> DictStats {
        self.lock_all_keys(tx);
        DictStats {
            size0: self.size_of(0),
            size1: self.size_of(1),
            rehash_idx: self.rehash_idx(),
            used: self.used_total(),
        }
    }
}

/// 后台 rehash 循环：空闲时睡一拍再查，搬迁期间连续推进。
pub fn rehash_loop(
    dict: Arc<Dict>,
    pool: Arc<TxPool>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut busy = false;
    while running.load(Ordering::Relaxed) {
        if !busy {
            std::thread::sleep(interval);
        }
        let mut tx = pool.undo();
        match dict.rehash_step(&mut tx) {
            Ok(b) => busy = b,
            Err(e) => {
                eprintln!("rehash step failed: {}", e);
                busy = false;
            }
        }
    }
}
