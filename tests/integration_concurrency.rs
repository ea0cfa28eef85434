// tests/integration_concurrency.rs

use std::sync::Arc;
use std::thread;

use anyhow::Result;

use pudis::config::Config;
use pudis::db::Db;
use pudis::server::Server;
use pudis::txn::Tx;

fn cmd(srv: &Server, parts: &[&str]) -> String {
    let argv = parts.iter().map(|s| s.as_bytes().to_vec()).collect();
    String::from_utf8(srv.execute(argv)).unwrap()
}

/// N 个客户端各做 M 次 INCR，最终值必须恰好是 N*M。
/// 事务池只有 8 个小槽，这里同时也在压准入控制。
#[test]
fn test_concurrent_incr_sums_exactly() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests())?;
    let srv = Server::new(db);

    const N: usize = 8;
    const M: usize = 100;

    let mut handles = Vec::new();
    for _ in 0..N {
        let srv = srv.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..M {
                let r = cmd(&srv, &["INCR", "counter"]);
                assert!(r.starts_with(':'), "INCR 回复异常: {}", r);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        cmd(&srv, &["GET", "counter"]),
        format!("${}\r\n{}\r\n", (N * M).to_string().len(), N * M)
    );
    Ok(())
}

/// 多线程写各自的 key 区间，互不踩踏，总量正确。
#[test]
fn test_concurrent_disjoint_writers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests())?;
    let srv = Server::new(db);

    const N: usize = 4;
    const PER: usize = 100;

    let mut handles = Vec::new();
    for t in 0..N {
        let srv = srv.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER {
                let k = format!("w{}:{}", t, i);
                assert_eq!(cmd(&srv, &["SET", &k, &k]), "+OK\r\n");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cmd(&srv, &["DBSIZE"]), format!(":{}\r\n", N * PER));
    for t in 0..N {
        let k = format!("w{}:{}", t, PER - 1);
        assert_eq!(cmd(&srv, &["GET", &k]), format!("${}\r\n{}\r\n", k.len(), k));
    }
    Ok(())
}

/// 填过扩容阈值后，用检视钩子盯着一次完整的 rehash：
/// size0 翻倍、rehash 游标走到头、t1 收回、期间每个 key 都可读。
#[test]
fn test_rehash_observed_and_lossless() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests())?;
    let srv = Server::new(db.clone());

    const KEYS: usize = 64;
    for i in 0..KEYS {
        let k = format!("key:{}", i);
        assert_eq!(cmd(&srv, &["SET", &k, &k]), "+OK\r\n");
    }

    let initial = {
        let mut tx = db.pool.readonly();
        tx.begin();
        let s = db.dict.stats(&mut tx);
        tx.commit().unwrap();
        s
    };
    assert_eq!(initial.size0, 8, "小配置的初始表应是 8 桶");
    assert_eq!(initial.used, KEYS as u64);
    assert_eq!(initial.rehash_idx, -1);

    // 手动泵 rehash 微步（后台线程同样走这条路径），
    // 全程读可用、不丢 key
    let mut seen_t1 = false;
    let mut seen_cursor = false;
    for step in 0.. {
        assert!(step < 10_000, "rehash 不收敛");
        let mut tx = db.pool.undo();
        let busy = db.dict.rehash_step(&mut tx)?;
        drop(tx);

        let mut tx = db.pool.readonly();
        tx.begin();
        let s = db.dict.stats(&mut tx);
        tx.commit().unwrap();
        if s.size1 > 0 {
            seen_t1 = true;
            assert!(s.rehash_idx >= 0 && s.rehash_idx <= s.size0 as i64);
        }
        if s.rehash_idx > 0 {
            seen_cursor = true;
        }
        assert_eq!(s.used, KEYS as u64, "rehash 任何时刻 used 总数不变");

        for i in (0..KEYS).step_by(7) {
            let k = format!("key:{}", i);
            assert_eq!(
                cmd(&srv, &["GET", &k]),
                format!("${}\r\n{}\r\n", k.len(), k),
                "rehash 进行中 key 必须可读"
            );
        }
        if !busy && s.rehash_idx == -1 && s.size0 >= KEYS as u64 {
            break;
        }
    }
    assert!(seen_t1, "应观察到 t1 阶段");
    assert!(seen_cursor, "应观察到 rehash 游标推进");

    let fin = {
        let mut tx = db.pool.readonly();
        tx.begin();
        let s = db.dict.stats(&mut tx);
        tx.commit().unwrap();
        s
    };
    assert!(fin.size0 >= KEYS as u64 && fin.size0.is_power_of_two());
    assert_eq!(fin.size1, 0);
    assert_eq!(fin.rehash_idx, -1);

    // rehash 完之后每个 key 原值健在
    for i in 0..KEYS {
        let k = format!("key:{}", i);
        assert_eq!(cmd(&srv, &["GET", &k]), format!("${}\r\n{}\r\n", k.len(), k));
    }
    Ok(())
}

/// 读线程持续 GET，同时另一个线程把 rehash 从头泵到尾：
/// 任何一次读都不允许看到丢失或错值。
#[test]
fn test_reads_during_concurrent_rehash() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests())?;
    let srv = Server::new(db.clone());

    const KEYS: usize = 48;
    for i in 0..KEYS {
        cmd(&srv, &["SET", &format!("rk:{}", i), "stable"]);
    }

    let pump = {
        let db = db.clone();
        thread::spawn(move || {
            // 把一轮扩容 rehash 跑完
            loop {
                let mut tx = db.pool.undo();
                let busy = db.dict.rehash_step(&mut tx).unwrap();
                drop(tx);
                if !busy && db.dict.rehash_idx() < 0 {
                    break;
                }
            }
        })
    };

    let mut readers = Vec::new();
    for t in 0..4 {
        let srv = srv.clone();
        readers.push(thread::spawn(move || {
            for round in 0..200 {
                let i = (t * 31 + round) % KEYS;
                let r = cmd(&srv, &["GET", &format!("rk:{}", i)]);
                assert_eq!(r, "$6\r\nstable\r\n", "并发 rehash 下读到错值");
            }
        }));
    }

    for h in readers {
        h.join().unwrap();
    }
    pump.join().unwrap();
    assert_eq!(cmd(&srv, &["DBSIZE"]), format!(":{}\r\n", KEYS));
    Ok(())
}

/// 混合负载冒烟：写、读、删、过期、聚合一起上，最后以一次
/// 只读体检收尾（类型检查由各命令自身完成）。
#[test]
fn test_mixed_workload_smoke() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let db = Db::open(tmp.path().join("region"), Config::small_for_tests())?;
    let srv = Server::new(db.clone());

    let mut handles = Vec::new();
    for t in 0..3 {
        let srv = srv.clone();
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                match (t + i) % 5 {
                    0 => {
                        cmd(&srv, &["SET", &format!("mix:{}:{}", t, i), "v"]);
                    }
                    1 => {
                        cmd(&srv, &["HSET", &format!("mixh:{}", t), &i.to_string(), "v"]);
                    }
                    2 => {
                        cmd(&srv, &["SADD", &format!("mixs:{}", t), &i.to_string()]);
                    }
                    3 => {
                        cmd(&srv, &["INCR", &format!("mixc:{}", t)]);
                    }
                    _ if i >= 5 => {
                        cmd(&srv, &["DEL", &format!("mix:{}:{}", t, i - 5)]);
                    }
                    _ => {}
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // 体检：used 与表不变量
    let mut tx = db.pool.readonly();
    tx.begin();
    let s = db.dict.stats(&mut tx);
    tx.commit().unwrap();
    assert!(s.size0.is_power_of_two());
    let dbsize: i64 = cmd(&srv, &["DBSIZE"])
        .trim_start_matches(':')
        .trim_end()
        .parse()?;
    assert_eq!(dbsize as u64, s.used);
    Ok(())
}
