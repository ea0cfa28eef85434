// src/txn/undo.rs

//! undo 事务实现。槽布局：
//! ```text
//! | tail:u64 | payload | {offset,size} | payload | {offset,size} | ...
//! ```
//! 写日志的持久化次序是 payload → 条目头 → fence → tail → fence，
//! 因此 tail 界定的范围内永远是完整的 payload+条目对，残缺的尾巴
//! 在回放时天然被忽略。

use std::sync::Arc;

use crate::alloc::Arena;
use crate::region::{PmOff, Region};
use crate::txn::{ShardLock, Tx, TxError, ENTRY_HDR, SLOT_HDR};

pub struct UndoTx {
    region: Arc<Region>,
    arena: Arc<Arena>,
    slot: PmOff, // {tail} 所在偏移
    buf: PmOff,  // slot + SLOT_HDR
    cap: u64,    // 日志字节容量
    tail: u64,   // tail 的易失镜像
    large: bool,
    level: u32,
    recovered: bool,
    rlocks: Vec<Arc<ShardLock>>,
    wlocks: Vec<Arc<ShardLock>>,
    reclaims: Vec<PmOff>,
}

impl UndoTx {
    /// 绑定一个日志槽。tail 非零说明上次运行崩在事务中途，立即回放。
    pub(crate) fn attach(
        region: Arc<Region>,
        arena: Arc<Arena>,
        slot: PmOff,
        slot_bytes: u64,
        large: bool,
    ) -> UndoTx {
        let tail = region.read_u64(slot);
        let recovered = tail > 0;
        if recovered {
            replay_slot(&region, slot);
        }
        UndoTx {
            region,
            arena,
            slot,
            buf: slot + SLOT_HDR,
            cap: slot_bytes - SLOT_HDR,
            tail: 0,
            large,
            level: 0,
            recovered,
            rlocks: Vec::with_capacity(4),
            wlocks: Vec::with_capacity(4),
            reclaims: Vec::new(),
        }
    }

    pub(crate) fn is_large(&self) -> bool {
        self.large
    }

    pub(crate) fn recovered(&self) -> bool {
        self.recovered
    }

    fn set_tail(&mut self, tail: u64) {
        self.region.fence();
        self.region.write_u64(self.slot, tail);
        self.region.persist(self.slot, SLOT_HDR);
        self.tail = tail;
    }

    fn unlock_all(&mut self) {
        for m in self.wlocks.drain(..) {
            m.wunlock();
        }
        for m in self.rlocks.drain(..) {
            m.runlock();
        }
    }
}

impl Tx for UndoTx {
    fn begin(&mut self) {
        self.level += 1;
    }

    fn log(&mut self, off: PmOff, len: u64) -> Result<(), TxError> {
        if self.level == 0 {
            return Err(TxError::NoActiveTx);
        }
        if self.tail + len + ENTRY_HDR > self.cap {
            return Err(TxError::LogOverflow);
        }

        // payload：被覆盖区域的当前值
        self.region.copy_within(off, self.buf + self.tail, len);
        self.region.persist(self.buf + self.tail, len);
        let mut t = self.tail + len;

        // 条目头 {offset, size}
        self.region.write_u64(self.buf + t, off);
        self.region.write_u64(self.buf + t + 8, len);
        self.region.persist(self.buf + t, ENTRY_HDR);
        t += ENTRY_HDR;

        // fence 夹着的 tail 更新是提交点
        self.set_tail(t);
        Ok(())
    }

    fn fake_log(&mut self, _off: PmOff, _len: u64) {}

    fn commit(&mut self) -> Result<(), TxError> {
        if self.level == 0 {
            return Err(TxError::NoActiveTx);
        }
        self.level -= 1;
        if self.level > 0 {
            return Ok(());
        }

        // 倒序刷新每个已记录区域的当前（已提交）值
        let mut t = self.tail;
        while t > 0 {
            let off = self.region.read_u64(self.buf + t - ENTRY_HDR);
            let len = self.region.read_u64(self.buf + t - ENTRY_HDR + 8);
            self.region.persist(off, len);
            t -= ENTRY_HDR + len;
        }
        debug_assert_eq!(t, 0, "undo log not correctly parsed at commit");
        self.set_tail(0);
        self.unlock_all();

        // 提交已持久，被替换的块此刻才真正不可达
        for off in self.reclaims.drain(..) {
            self.arena.free(off);
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.level = 0;
        let mut t = self.tail;
        while t > 0 {
            let off = self.region.read_u64(self.buf + t - ENTRY_HDR);
            let len = self.region.read_u64(self.buf + t - ENTRY_HDR + 8);
            t -= ENTRY_HDR + len;
            self.region.copy_within(self.buf + t, off, len);
            self.region.persist(off, len);
        }
        debug_assert_eq!(t, 0, "undo log not correctly parsed at rollback");
        self.set_tail(0);
        self.unlock_all();
        self.reclaims.clear();
    }

    fn rlock(&mut self, m: &Arc<ShardLock>) {
        m.rlock();
        self.rlocks.push(m.clone());
    }

    fn wlock(&mut self, m: &Arc<ShardLock>) {
        m.wlock();
        self.wlocks.push(m.clone());
    }

    fn lock(&mut self, m: &Arc<ShardLock>) {
        self.wlock(m);
    }

    fn reclaim(&mut self, payload: PmOff) {
        self.reclaims.push(payload);
    }
}

/// 按 tail 倒序回放一个槽并截断。独立函数：恢复路径不需要整个事务对象。
fn replay_slot(region: &Region, slot: PmOff) {
    let buf = slot + SLOT_HDR;
    let mut t = region.read_u64(slot);
    while t >= ENTRY_HDR {
        let off = region.read_u64(buf + t - ENTRY_HDR);
        let len = region.read_u64(buf + t - ENTRY_HDR + 8);
        if len + ENTRY_HDR > t {
            // tail 之内必是完整的 payload+条目对；到不齐说明槽从未初始化
            break;
        }
        t -= ENTRY_HDR + len;
        region.copy_within(buf + t, off, len);
        region.persist(off, len);
    }
    region.fence();
    region.write_u64(slot, 0);
    region.persist(slot, SLOT_HDR);
}

/// 回放全部日志槽（测试与诊断用；TxPool::new 入池时会做同样的事）
pub fn replay_all_slots(region: &Region) -> usize {
    use crate::txn::{LARGE_SLOT_BYTES, N_LARGE, N_SMALL, SMALL_SLOT_BYTES};
    let base = region.log_off();
    let mut n = 0;
    for i in 0..N_SMALL {
        let slot = base + (i * SMALL_SLOT_BYTES) as u64;
        if region.read_u64(slot) > 0 {
            replay_slot(region, slot);
            n += 1;
        }
    }
    let lbase = base + (N_SMALL * SMALL_SLOT_BYTES) as u64;
    for i in 0..N_LARGE {
        let slot = lbase + (i * LARGE_SLOT_BYTES) as u64;
        if region.read_u64(slot) > 0 {
            replay_slot(region, slot);
            n += 1;
        }
    }
    n
}
