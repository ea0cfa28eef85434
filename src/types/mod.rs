// src/types/mod.rs
//! 数据类型命令：String / Hash / Set（都是字典层的消费者）

pub mod hash;
pub mod set;
pub mod string;

use crate::server::{Client, WRONGTYPEERR};
use crate::value::ValueError;

/// 把值层的域错误映射成标准回复
pub(crate) fn reply_value_error(c: &mut Client, e: &ValueError) {
    match e {
        ValueError::WrongType => c.add_reply(WRONGTYPEERR),
        other => c.add_reply_error(&other.to_string()),
    }
}
