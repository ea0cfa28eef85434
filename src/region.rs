// src/region.rs

//! # 持久内存区
//!
//! 把一个固定大小的文件映射进进程地址空间，作为整个数据库的唯一持久存储。
//! 区内所有持久引用都是**相对区基址的偏移**（`u64`，0 表示空指针），
//! 因此重新打开时映射到任何地址都有效，不需要指针 swizzle。
//!
//! 布局：
//! ```text
//! 偏移 0   : 区头（一个 cacheline）
//!            magic:u32 version:u32 size:u64 map_addr:u64
//!            db_root:u64 log_off:u64 arena_off:u64 crc:u32
//! 偏移 64  : undo 日志槽表（见 txn 模块）
//! 日志区末 : arena（见 alloc 模块）
//! ```

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};
use memmap2::MmapRaw;

use crate::txn::LOG_AREA_SIZE;

/// 区头 magic 常量
pub const MAGIC: u32 = 657071;
pub const VERSION: u32 = 1;
pub const CACHELINE: usize = 64;

/// 持久偏移，0 表示空
pub type PmOff = u64;

// 区头字段偏移
const HDR_MAGIC: u64 = 0;
const HDR_VERSION: u64 = 4;
const HDR_SIZE: u64 = 8;
const HDR_MAP_ADDR: u64 = 16;
const HDR_DB_ROOT: u64 = 24;
const HDR_LOG_OFF: u64 = 32;
const HDR_ARENA_OFF: u64 = 40;
const HDR_CRC: u64 = 48;
const HDR_CRC_COVER: usize = 48; // crc 覆盖 [0, 48)

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug)]
pub enum RegionError {
    Io(std::io::Error),
    /// magic 或校验和不符
    CorruptRegion,
    /// 文件已存在但大小与请求不同
    SizeMismatch { expect: u64, found: u64 },
    /// 请求的区大小装不下区头 + 日志区
    TooSmall(u64),
    BadVersion(u32),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::Io(e) => write!(f, "region I/O error: {}", e),
            RegionError::CorruptRegion => write!(f, "region magic or checksum does not match"),
            RegionError::SizeMismatch { expect, found } => {
                write!(f, "region size mismatch: expect {}, found {}", expect, found)
            }
            RegionError::TooSmall(s) => write!(f, "region size {} too small", s),
            RegionError::BadVersion(v) => write!(f, "unsupported region version {}", v),
        }
    }
}

impl std::error::Error for RegionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RegionError {
    fn from(e: std::io::Error) -> Self {
        RegionError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, RegionError>;

/// 已映射的持久区。
///
/// 所有读写都经过偏移 + 显式 persist，并发正确性由上层（字典的分片锁、
/// 事务的持锁表）保证；Region 本身只做边界检查。
pub struct Region {
    raw: MmapRaw,
    len: u64,
}

impl Region {
    /// 打开或创建区文件。返回 (区, 是否首次初始化)。
    pub fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<(Region, bool)> {
        let min = (CACHELINE + LOG_AREA_SIZE) as u64 + CACHELINE as u64;
        if size < min {
            return Err(RegionError::TooSmall(size));
        }

        let path = path.as_ref();
        let exists = path.exists() && path.metadata()?.len() > 0;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if exists {
            let found = file.metadata()?.len();
            if found != size {
                return Err(RegionError::SizeMismatch {
                    expect: size,
                    found,
                });
            }
        } else {
            file.set_len(size)?;
        }

        let raw = MmapRaw::map_raw(&file)?;
        let region = Region { raw, len: size };

        if exists {
            region.validate_header(size)?;
            // 记录本次映射地址（仅诊断用，偏移寻址不依赖它）
            region.write_u64(HDR_MAP_ADDR, region.base_addr());
            region.rewrite_header_crc();
            Ok((region, false))
        } else {
            region.init_header(size);
            Ok((region, true))
        }
    }

    fn init_header(&self, size: u64) {
        let log_off = CACHELINE as u64;
        let arena_off = log_off + LOG_AREA_SIZE as u64;
        self.write_u32(HDR_MAGIC, MAGIC);
        self.write_u32(HDR_VERSION, VERSION);
        self.write_u64(HDR_SIZE, size);
        self.write_u64(HDR_MAP_ADDR, self.base_addr());
        self.write_u64(HDR_DB_ROOT, 0);
        self.write_u64(HDR_LOG_OFF, log_off);
        self.write_u64(HDR_ARENA_OFF, arena_off);
        self.rewrite_header_crc();
    }

    fn validate_header(&self, size: u64) -> Result<()> {
        if self.read_u32(HDR_MAGIC) != MAGIC {
            return Err(RegionError::CorruptRegion);
        }
        let v = self.read_u32(HDR_VERSION);
        if v != VERSION {
            return Err(RegionError::BadVersion(v));
        }
        let crc = CRC32.checksum(self.bytes(0, HDR_CRC_COVER));
        if crc != self.read_u32(HDR_CRC) {
            return Err(RegionError::CorruptRegion);
        }
        let stored = self.read_u64(HDR_SIZE);
        if stored != size {
            return Err(RegionError::SizeMismatch {
                expect: size,
                found: stored,
            });
        }
        Ok(())
    }

    fn rewrite_header_crc(&self) {
        let crc = CRC32.checksum(self.bytes(0, HDR_CRC_COVER));
        self.write_u32(HDR_CRC, crc);
        self.persist(0, CACHELINE as u64);
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn base_addr(&self) -> u64 {
        self.raw.as_mut_ptr() as u64
    }

    pub fn log_off(&self) -> PmOff {
        self.read_u64(HDR_LOG_OFF)
    }

    pub fn arena_off(&self) -> PmOff {
        self.read_u64(HDR_ARENA_OFF)
    }

    pub fn db_root(&self) -> PmOff {
        self.read_u64(HDR_DB_ROOT)
    }

    /// 设置数据库根偏移，返回前持久化
    pub fn set_db_root(&self, off: PmOff) {
        self.write_u64(HDR_DB_ROOT, off);
        self.rewrite_header_crc();
    }

    #[inline]
    fn check(&self, off: u64, len: u64) {
        assert!(
            off.checked_add(len).map_or(false, |end| end <= self.len),
            "region access out of range: off={} len={} region={}",
            off,
            len,
            self.len
        );
    }

    /// 读取一段持久字节。
    ///
    /// SAFETY: 映射对进程独占（区文件不被外部修改），切片生命周期绑定
    /// 在 &self 上；并发写同一范围由上层锁纪律排除。
    #[inline]
    pub fn bytes(&self, off: u64, len: usize) -> &[u8] {
        self.check(off, len as u64);
        unsafe { std::slice::from_raw_parts(self.raw.as_mut_ptr().add(off as usize), len) }
    }

    /// 写入一段持久字节（不含 persist，调用方决定刷新时机）
    #[inline]
    pub fn write_bytes(&self, off: u64, data: &[u8]) {
        self.check(off, data.len() as u64);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.raw.as_mut_ptr().add(off as usize),
                data.len(),
            );
        }
    }

    /// 区内拷贝（undo 日志写入/回放用）
    #[inline]
    pub fn copy_within(&self, src: u64, dst: u64, len: u64) {
        self.check(src, len);
        self.check(dst, len);
        unsafe {
            std::ptr::copy(
                self.raw.as_mut_ptr().add(src as usize),
                self.raw.as_mut_ptr().add(dst as usize),
                len as usize,
            );
        }
    }

    #[inline]
    pub fn fill_zero(&self, off: u64, len: u64) {
        self.check(off, len);
        unsafe {
            std::ptr::write_bytes(self.raw.as_mut_ptr().add(off as usize), 0, len as usize);
        }
    }

    #[inline]
    pub fn read_u32(&self, off: u64) -> u32 {
        LittleEndian::read_u32(self.bytes(off, 4))
    }

    #[inline]
    pub fn write_u32(&self, off: u64, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.write_bytes(off, &buf);
    }

    #[inline]
    pub fn read_u64(&self, off: u64) -> u64 {
        LittleEndian::read_u64(self.bytes(off, 8))
    }

    #[inline]
    pub fn write_u64(&self, off: u64, v: u64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, v);
        self.write_bytes(off, &buf);
    }

    #[inline]
    pub fn read_i64(&self, off: u64) -> i64 {
        self.read_u64(off) as i64
    }

    #[inline]
    pub fn write_i64(&self, off: u64, v: i64) {
        self.write_u64(off, v as u64);
    }

    /// cacheline 刷新的模拟：把 [off, off+len) 刷回文件。
    /// msync 失败说明底层设备出了问题，持久性承诺无法维持，直接 panic
    /// （事务守卫会在栈展开时回滚并放锁）。
    pub fn flush(&self, off: u64, len: u64) {
        self.check(off, len);
        if let Err(e) = self.raw.flush_range(off as usize, len as usize) {
            panic!("region flush failed at {}+{}: {}", off, len, e);
        }
    }

    /// store fence
    #[inline]
    pub fn fence(&self) {
        fence(Ordering::SeqCst);
    }

    /// 刷新 + fence，等价于原子的"这段数据已落盘"
    pub fn persist(&self, off: u64, len: u64) {
        self.flush(off, len);
        self.fence();
    }
}

// SAFETY: MmapRaw 本身 Send + Sync；跨线程的写冲突由字典分片锁与事务
// 持锁纪律排除，Region 只提供受边界检查的访问原语。
unsafe impl Send for Region {}
unsafe impl Sync for Region {}
