// src/value.rs

//! 多态值：entry 里内联一对 (vtag, vdata)。
//! 标量（整数/浮点）直接内联在 vdata，字节串指向带长度前缀的 arena 块，
//! 聚合（hash/set）指向嵌套字典头。zset / list 的标签码先占住，
//! 编码不会因为将来补上它们而改变。

use std::fmt;
use std::sync::Arc;

use crate::alloc::Arena;
use crate::dict::Dict;
use crate::region::{PmOff, Region};
use crate::txn::Tx;

pub const TAG_NONE: u64 = 0; // set 成员：无值
pub const TAG_BYTES: u64 = 1;
pub const TAG_INT: u64 = 2;
pub const TAG_FLOAT: u64 = 3;
pub const TAG_HASH: u64 = 4;
pub const TAG_SET: u64 = 5;
pub const TAG_ZSET: u64 = 6; // 保留
pub const TAG_LIST: u64 = 7; // 保留

#[derive(Debug, PartialEq, Eq)]
pub enum ValueError {
    WrongType,
    NotInteger,
    NotFloat,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::WrongType => {
                write!(f, "Operation against a key holding the wrong kind of value")
            }
            ValueError::NotInteger => write!(f, "value is not an integer or out of range"),
            ValueError::NotFloat => write!(f, "value is not a valid float"),
        }
    }
}

/// 影子拷贝：易失缓冲先落进 arena（带 u64 长度前缀）并持久化，
/// 之后才允许任何可达指针指向它。
pub fn shadow_copy(region: &Region, arena: &Arena, data: &[u8]) -> PmOff {
    let off = arena.alloc(8 + data.len() as u64);
    region.write_u64(off, data.len() as u64);
    region.write_bytes(off + 8, data);
    region.persist(off, 8 + data.len() as u64);
    off
}

pub fn load_bytes(region: &Region, vdata: PmOff) -> &[u8] {
    let len = region.read_u64(vdata);
    region.bytes(vdata + 8, len as usize)
}

/// 字符串视图：GET / APPEND / STRLEN 等命令看到的字节串。
/// 聚合值返回 WrongType。
pub fn as_string(region: &Region, tag: u64, data: u64) -> Result<Vec<u8>, ValueError> {
    match tag {
        TAG_BYTES => Ok(load_bytes(region, data).to_vec()),
        TAG_INT => Ok((data as i64).to_string().into_bytes()),
        TAG_FLOAT => Ok(format_f64(f64::from_bits(data)).into_bytes()),
        _ => Err(ValueError::WrongType),
    }
}

pub fn string_len(region: &Region, tag: u64, data: u64) -> Result<usize, ValueError> {
    match tag {
        TAG_BYTES => Ok(region.read_u64(data) as usize),
        _ => as_string(region, tag, data).map(|v| v.len()),
    }
}

pub fn as_int(region: &Region, tag: u64, data: u64) -> Result<i64, ValueError> {
    match tag {
        TAG_INT => Ok(data as i64),
        TAG_BYTES => std::str::from_utf8(load_bytes(region, data))
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(ValueError::NotInteger),
        TAG_FLOAT => Err(ValueError::NotInteger),
        _ => Err(ValueError::WrongType),
    }
}

pub fn as_float(region: &Region, tag: u64, data: u64) -> Result<f64, ValueError> {
    match tag {
        TAG_FLOAT => Ok(f64::from_bits(data)),
        TAG_INT => Ok(data as i64 as f64),
        TAG_BYTES => std::str::from_utf8(load_bytes(region, data))
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| !v.is_nan())
            .ok_or(ValueError::NotFloat),
        _ => Err(ValueError::WrongType),
    }
}

pub fn as_hash(tag: u64, data: u64) -> Result<PmOff, ValueError> {
    if tag == TAG_HASH {
        Ok(data)
    } else {
        Err(ValueError::WrongType)
    }
}

pub fn as_set(tag: u64, data: u64) -> Result<PmOff, ValueError> {
    if tag == TAG_SET {
        Ok(data)
    } else {
        Err(ValueError::WrongType)
    }
}

pub fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e17 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// 把一个值的全部持久块（含嵌套聚合）挂进事务回收表。
/// 提交后这些块才归还分配器；回滚则原样保留。
pub fn reclaim_value(
    tx: &mut dyn Tx,
    region: &Arc<Region>,
    arena: &Arc<Arena>,
    tag: u64,
    data: u64,
) {
    match tag {
        TAG_BYTES => tx.reclaim(data),
        TAG_HASH | TAG_SET => {
            let d = Dict::attach(region.clone(), arena.clone(), data, true);
            let mut inner = Vec::new();
            d.for_each_entry(|e| inner.push(d.entry_value(e)));
            for (t, v) in inner {
                reclaim_value(tx, region, arena, t, v);
            }
            d.reclaim_structure(tx);
        }
        _ => {}
    }
}

/// sweep 活跃集：标记一个值的全部持久块
pub fn collect_live_value<F: FnMut(PmOff)>(
    region: &Arc<Region>,
    arena: &Arc<Arena>,
    tag: u64,
    data: u64,
    mark: &mut F,
) {
    match tag {
        TAG_BYTES => mark(data),
        TAG_HASH | TAG_SET => {
            let d = Dict::attach(region.clone(), arena.clone(), data, true);
            d.collect_live(mark);
            let mut inner = Vec::new();
            d.for_each_entry(|e| inner.push(d.entry_value(e)));
            for (t, v) in inner {
                collect_live_value(region, arena, t, v, mark);
            }
        }
        _ => {}
    }
}
