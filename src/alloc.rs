// src/alloc.rs

//! # 持久 arena 分配器
//!
//! 区内日志槽之后的空间是一个线性 arena。块以 16 字节对齐，带一个
//! 16 字节块头（记录载荷大小），分配时先清零并持久化载荷、再推进并
//! 持久化 `next` 游标。两步之间崩溃只会泄漏一个不可达块，不会损坏
//! 已有数据；泄漏由下次启动时的 mark-sweep 找回。
//!
//! 空闲链按块大小分桶，只存在于易失内存：提交后的显式 free 进桶，
//! 崩溃丢掉的 free 由 sweep（从数据库根可达性重建）补回。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::region::{PmOff, Region};

/// 块对齐与块头大小
pub const ALIGN: u64 = 16;
const BLOCK_HDR: u64 = 16; // {size:u64, 保留:u64}

// arena 头：{next:u64}，占一个对齐单位
const ARENA_HDR: u64 = 16;

struct FreeLists {
    // 取整后的载荷大小 -> 可复用的载荷偏移
    by_size: HashMap<u64, Vec<PmOff>>,
}

pub struct Arena {
    region: Arc<Region>,
    base: PmOff,
    state: Mutex<FreeLists>,
}

impl Arena {
    /// 接管区内 arena。`fresh` 为真时写入初始游标。
    pub fn new(region: Arc<Region>, fresh: bool) -> Arena {
        let base = region.arena_off();
        if fresh {
            region.write_u64(base, base + ARENA_HDR);
            region.persist(base, ARENA_HDR);
        }
        Arena {
            region,
            base,
            state: Mutex::new(FreeLists {
                by_size: HashMap::new(),
            }),
        }
    }

    fn next(&self) -> PmOff {
        self.region.read_u64(self.base)
    }

    #[inline]
    fn round(size: u64) -> u64 {
        let size = size.max(1);
        (size + ALIGN - 1) & !(ALIGN - 1)
    }

    /// 分配 `size` 字节，返回载荷偏移。载荷返回前已清零并持久化。
    /// arena 耗尽是致命错误：当前事务未提交，持久状态保持一致。
    pub fn alloc(&self, size: u64) -> PmOff {
        let round = Self::round(size);
        let mut st = self.state.lock();

        if let Some(list) = st.by_size.get_mut(&round) {
            if let Some(off) = list.pop() {
                drop(st);
                self.region.fill_zero(off, round);
                self.region.persist(off, round);
                return off;
            }
        }

        // 空闲链没有合适的块，从尾部切一块
        let next = self.next();
        let end = next
            .checked_add(BLOCK_HDR + round)
            .unwrap_or(u64::MAX);
        if end > self.region.len() {
            panic!(
                "persistent arena exhausted: need {} bytes at {}",
                BLOCK_HDR + round,
                next
            );
        }

        // 1. 块头 + 清零载荷，持久化
        self.region.write_u64(next, round);
        self.region.write_u64(next + 8, 0);
        self.region.fill_zero(next + BLOCK_HDR, round);
        self.region.persist(next, BLOCK_HDR + round);
        // 2. 推进游标，持久化（此前崩溃只泄漏这个块）
        self.region.write_u64(self.base, end);
        self.region.persist(self.base, 8);

        next + BLOCK_HDR
    }

    /// 载荷大小（取整后）
    pub fn block_size(&self, payload: PmOff) -> u64 {
        self.region.read_u64(payload - BLOCK_HDR)
    }

    /// 归还一个块。只能在持有该块的事务提交之后调用（见 txn::reclaim）。
    pub fn free(&self, payload: PmOff) {
        let size = self.block_size(payload);
        let mut st = self.state.lock();
        st.by_size.entry(size).or_default().push(payload);
    }

    /// 标记-清除：给定从根可达的载荷偏移集合，重建空闲链。
    /// 调用方必须保证没有并发事务在跑（启动恢复后 / 全表写锁下）。
    /// 返回找回的块数。
    pub fn sweep(&self, live: &HashSet<PmOff>) -> usize {
        let mut st = self.state.lock();
        st.by_size.clear();

        let mut off = self.base + ARENA_HDR;
        let next = self.next();
        let mut reclaimed = 0;
        while off < next {
            let size = self.region.read_u64(off);
            let payload = off + BLOCK_HDR;
            if !live.contains(&payload) {
                st.by_size.entry(size).or_default().push(payload);
                reclaimed += 1;
            }
            off = payload + size;
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use tempfile::tempdir;

    fn make_arena() -> (tempfile::TempDir, Arc<Region>, Arena) {
        let tmp = tempdir().unwrap();
        let (r, fresh) = Region::open(tmp.path().join("region"), 8 * 1024 * 1024).unwrap();
        assert!(fresh);
        let r = Arc::new(r);
        let a = Arena::new(r.clone(), true);
        (tmp, r, a)
    }

    #[test]
    fn test_alloc_zeroed_and_aligned() {
        let (_tmp, r, a) = make_arena();
        let off = a.alloc(40);
        assert_eq!(off % ALIGN, 0);
        assert_eq!(a.block_size(off), 48); // 40 取整到 48
        assert!(r.bytes(off, 48).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_and_reuse() {
        let (_tmp, r, a) = make_arena();
        let off = a.alloc(32);
        r.write_bytes(off, b"dirty");
        a.free(off);
        // 同尺寸分配复用同一块，且重新清零
        let off2 = a.alloc(32);
        assert_eq!(off2, off);
        assert!(r.bytes(off2, 32).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sweep_rebuilds_free_lists() {
        let (_tmp, _r, a) = make_arena();
        let keep = a.alloc(16);
        let _lost = a.alloc(16);
        let _lost2 = a.alloc(64);

        let mut live = HashSet::new();
        live.insert(keep);
        assert_eq!(a.sweep(&live), 2);

        // 两个尺寸桶都应可复用
        let r1 = a.alloc(16);
        let r2 = a.alloc(64);
        assert_ne!(r1, keep);
        assert_eq!(a.block_size(r2), 64);
    }
}
