// src/txn/mod.rs

//! # undo 日志事务
//!
//! 每个事务占用区内一个持久日志槽，改写任何持久字节前先把原值追加进
//! 日志（payload → 条目头 → tail，逐级持久化），提交时把改后值刷盘并
//! 截断日志，回滚时倒序回放。重新打开区时，tail 非零的槽一律回放，
//! 于是崩溃点之后看到的永远是"事务开始前"的状态。
//!
//! 全局锁定顺序（固定，勿改）：
//! expire 字典先于主字典；rehashLock → dictLock → 分片锁；
//! 表 0 先于表 1；分片 id 升序。

mod readonly;
mod undo;

pub use readonly::ReadonlyTx;
pub use undo::{replay_all_slots, UndoTx};

use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::RawRwLock as RawRwLockApi;
use parking_lot::{Condvar, Mutex, RawRwLock};

use crate::alloc::Arena;
use crate::region::{PmOff, Region};

/// 小日志槽：4 KiB（含 8 字节 tail）
pub const SMALL_SLOT_BYTES: usize = 4 * 1024;
/// 大日志槽：512 KiB（含 8 字节 tail）
pub const LARGE_SLOT_BYTES: usize = 512 * 1024;
pub const N_SMALL: usize = 8;
pub const N_LARGE: usize = 4;
/// 日志区总大小（region 布局用）
pub const LOG_AREA_SIZE: usize = N_SMALL * SMALL_SLOT_BYTES + N_LARGE * LARGE_SLOT_BYTES;

/// 槽内 tail 头
pub(crate) const SLOT_HDR: u64 = 8;
/// 日志条目头 {offset:u64, size:u64}
pub(crate) const ENTRY_HDR: u64 = 16;

#[derive(Debug, PartialEq, Eq)]
pub enum TxError {
    /// Begin 之外调用 Log / Commit
    NoActiveTx,
    /// 单个事务超出日志槽容量；调用方可换用大槽事务重试
    LogOverflow,
    /// 只读事务禁止写日志
    ReadOnlyTx,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::NoActiveTx => write!(f, "no active transaction"),
            TxError::LogOverflow => write!(f, "transaction log overflow"),
            TxError::ReadOnlyTx => write!(f, "readonly transaction cannot log"),
        }
    }
}

impl std::error::Error for TxError {}

/// 事务持有的读写锁。
///
/// 用 RawRwLock 而不是带守卫的 RwLock：持锁表跨越整条命令的生命周期，
/// 解锁时机由事务的提交/回滚决定，守卫的借用期表达不了这种纪律。
pub struct ShardLock {
    raw: RawRwLock,
}

impl ShardLock {
    pub fn new() -> ShardLock {
        ShardLock {
            raw: <RawRwLock as RawRwLockApi>::INIT,
        }
    }

    #[inline]
    pub(crate) fn rlock(&self) {
        self.raw.lock_shared();
    }

    #[inline]
    pub(crate) fn wlock(&self) {
        self.raw.lock_exclusive();
    }

    #[inline]
    pub(crate) fn runlock(&self) {
        // SAFETY: 只由事务的放锁路径调用，与 rlock 一一配对
        unsafe { self.raw.unlock_shared() }
    }

    #[inline]
    pub(crate) fn wunlock(&self) {
        // SAFETY: 只由事务的放锁路径调用，与 wlock 一一配对
        unsafe { self.raw.unlock_exclusive() }
    }
}

impl Default for ShardLock {
    fn default() -> Self {
        ShardLock::new()
    }
}

/// 事务统一接口：undo 事务与只读事务都实现它。
pub trait Tx: Send {
    /// 提升嵌套层级；日志合并到最外层 Commit 才截断
    fn begin(&mut self);
    /// 记录 [off, off+len) 的当前值，之后才允许改写
    fn log(&mut self, off: PmOff, len: u64) -> Result<(), TxError>;
    /// 影子更新占位：新值写在新分配的块里，无须回滚
    fn fake_log(&mut self, off: PmOff, len: u64);
    /// 最外层提交：刷新全部已记录区域的当前值，tail 归零，放锁
    fn commit(&mut self) -> Result<(), TxError>;
    /// 回放日志恢复原值，tail 归零，放锁
    fn abort(&mut self);
    fn rlock(&mut self, m: &Arc<ShardLock>);
    fn wlock(&mut self, m: &Arc<ShardLock>);
    /// 多态锁：undo 事务取写锁，只读事务取读锁
    fn lock(&mut self, m: &Arc<ShardLock>);
    /// 注册一个提交后才归还分配器的块（被替换的值、摘链的 entry）
    fn reclaim(&mut self, payload: PmOff);
}

pub(crate) enum TxBox {
    Undo(UndoTx),
    Ro(ReadonlyTx),
}

impl TxBox {
    fn as_tx(&mut self) -> &mut dyn Tx {
        match self {
            TxBox::Undo(t) => t,
            TxBox::Ro(t) => t,
        }
    }
}

/// 事务池：小槽 / 大槽各一组，取空即阻塞，这是天然的准入控制。
pub struct TxPool {
    small: Mutex<Vec<UndoTx>>,
    small_cv: Condvar,
    large: Mutex<Vec<UndoTx>>,
    large_cv: Condvar,
}

impl TxPool {
    /// 构建事务池。每个槽在入池前先按 tail 回放一次，这同时就是
    /// 崩溃恢复：重新打开区后残留的半途事务在这里统一回滚。
    /// 返回 (池, 回滚的槽数)。
    pub fn new(region: &Arc<Region>, arena: &Arc<Arena>) -> (Arc<TxPool>, usize) {
        let log_base = region.log_off();
        let mut recovered = 0;

        let mut small = Vec::with_capacity(N_SMALL);
        for i in 0..N_SMALL {
            let off = log_base + (i * SMALL_SLOT_BYTES) as u64;
            let t = UndoTx::attach(region.clone(), arena.clone(), off, SMALL_SLOT_BYTES as u64, false);
            recovered += t.recovered() as usize;
            small.push(t);
        }
        let large_base = log_base + (N_SMALL * SMALL_SLOT_BYTES) as u64;
        let mut large = Vec::with_capacity(N_LARGE);
        for i in 0..N_LARGE {
            let off = large_base + (i * LARGE_SLOT_BYTES) as u64;
            let t = UndoTx::attach(region.clone(), arena.clone(), off, LARGE_SLOT_BYTES as u64, true);
            recovered += t.recovered() as usize;
            large.push(t);
        }

        (
            Arc::new(TxPool {
                small: Mutex::new(small),
                small_cv: Condvar::new(),
                large: Mutex::new(large),
                large_cv: Condvar::new(),
            }),
            recovered,
        )
    }

    /// 取一个小槽 undo 事务，槽全忙则阻塞
    pub fn undo(self: &Arc<Self>) -> TxGuard {
        let mut q = self.small.lock();
        while q.is_empty() {
            self.small_cv.wait(&mut q);
        }
        let t = q.pop().unwrap();
        TxGuard {
            inner: Some(TxBox::Undo(t)),
            pool: self.clone(),
        }
    }

    /// 取一个大槽 undo 事务
    pub fn large_undo(self: &Arc<Self>) -> TxGuard {
        let mut q = self.large.lock();
        while q.is_empty() {
            self.large_cv.wait(&mut q);
        }
        let t = q.pop().unwrap();
        TxGuard {
            inner: Some(TxBox::Undo(t)),
            pool: self.clone(),
        }
    }

    /// 只读事务：只记锁不记日志，不占槽
    pub fn readonly(self: &Arc<Self>) -> TxGuard {
        TxGuard {
            inner: Some(TxBox::Ro(ReadonlyTx::new())),
            pool: self.clone(),
        }
    }

    fn put(&self, t: UndoTx) {
        if t.is_large() {
            self.large.lock().push(t);
            self.large_cv.notify_one();
        } else {
            self.small.lock().push(t);
            self.small_cv.notify_one();
        }
    }
}

/// 池化事务的 RAII 守卫：任何退出路径（包括 panic 展开）都会回滚
/// 未提交的日志、释放全部持锁，然后把槽还给池。
pub struct TxGuard {
    inner: Option<TxBox>,
    pool: Arc<TxPool>,
}

impl Tx for TxGuard {
    fn begin(&mut self) {
        self.inner.as_mut().unwrap().as_tx().begin()
    }
    fn log(&mut self, off: PmOff, len: u64) -> Result<(), TxError> {
        self.inner.as_mut().unwrap().as_tx().log(off, len)
    }
    fn fake_log(&mut self, off: PmOff, len: u64) {
        self.inner.as_mut().unwrap().as_tx().fake_log(off, len)
    }
    fn commit(&mut self) -> Result<(), TxError> {
        self.inner.as_mut().unwrap().as_tx().commit()
    }
    fn abort(&mut self) {
        self.inner.as_mut().unwrap().as_tx().abort()
    }
    fn rlock(&mut self, m: &Arc<ShardLock>) {
        self.inner.as_mut().unwrap().as_tx().rlock(m)
    }
    fn wlock(&mut self, m: &Arc<ShardLock>) {
        self.inner.as_mut().unwrap().as_tx().wlock(m)
    }
    fn lock(&mut self, m: &Arc<ShardLock>) {
        self.inner.as_mut().unwrap().as_tx().lock(m)
    }
    fn reclaim(&mut self, payload: PmOff) {
        self.inner.as_mut().unwrap().as_tx().reclaim(payload)
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if let Some(mut b) = self.inner.take() {
            b.as_tx().abort();
            if let TxBox::Undo(t) = b {
                self.pool.put(t);
            }
        }
    }
}
