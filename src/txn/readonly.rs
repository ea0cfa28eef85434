// src/txn/readonly.rs

//! 只读事务：只记录持有的读锁，提交即放锁。

use std::sync::Arc;

use crate::region::PmOff;
use crate::txn::{ShardLock, Tx, TxError};

pub struct ReadonlyTx {
    level: u32,
    rlocks: Vec<Arc<ShardLock>>,
}

impl ReadonlyTx {
    pub fn new() -> ReadonlyTx {
        ReadonlyTx {
            level: 0,
            rlocks: Vec::with_capacity(4),
        }
    }

    fn unlock_all(&mut self) {
        for m in self.rlocks.drain(..) {
            m.runlock();
        }
    }
}

impl Default for ReadonlyTx {
    fn default() -> Self {
        ReadonlyTx::new()
    }
}

impl Tx for ReadonlyTx {
    fn begin(&mut self) {
        self.level += 1;
    }

    fn log(&mut self, _off: PmOff, _len: u64) -> Result<(), TxError> {
        Err(TxError::ReadOnlyTx)
    }

    fn fake_log(&mut self, _off: PmOff, _len: u64) {}

    fn commit(&mut self) -> Result<(), TxError> {
        if self.level == 0 {
            return Err(TxError::NoActiveTx);
        }
        self.level -= 1;
        if self.level == 0 {
            self.unlock_all();
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.level = 0;
        self.unlock_all();
    }

    fn rlock(&mut self, m: &Arc<ShardLock>) {
        m.rlock();
        self.rlocks.push(m.clone());
    }

    fn wlock(&mut self, m: &Arc<ShardLock>) {
        // 只读事务不应请求写锁；按读锁处理并在调试构建里报警
        debug_assert!(false, "wlock on readonly transaction");
        self.rlock(m);
    }

    fn lock(&mut self, m: &Arc<ShardLock>) {
        self.rlock(m);
    }

    fn reclaim(&mut self, _payload: PmOff) {
        debug_assert!(false, "reclaim on readonly transaction");
    }
}
