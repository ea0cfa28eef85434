// tests/integration_persistence.rs

use anyhow::Result;

use pudis::config::Config;
use pudis::db::Db;
use pudis::server::Server;
use pudis::txn::Tx;
use pudis::value::{self, TAG_BYTES};

fn cmd(srv: &Server, parts: &[&str]) -> String {
    let argv = parts.iter().map(|s| s.as_bytes().to_vec()).collect();
    String::from_utf8(srv.execute(argv)).unwrap()
}

#[test]
fn test_reopen_preserves_data() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("region");
    let cfg = Config::small_for_tests();

    {
        let srv = Server::new(Db::open(&path, cfg.clone())?);
        assert_eq!(cmd(&srv, &["SET", "durable", "value"]), "+OK\r\n");
        assert_eq!(cmd(&srv, &["HSET", "h", "f1", "v1", "f2", "v2"]), ":2\r\n");
        assert_eq!(cmd(&srv, &["SADD", "s", "m1", "m2"]), ":2\r\n");
        assert_eq!(cmd(&srv, &["EXPIRE", "durable", "1000"]), ":1\r\n");
        assert_eq!(cmd(&srv, &["INCR", "cnt"]), ":1\r\n");
    }

    // 重新打开：数据、聚合、TTL 全在
    {
        let srv = Server::new(Db::open(&path, cfg)?);
        assert_eq!(cmd(&srv, &["GET", "durable"]), "$5\r\nvalue\r\n");
        assert_eq!(cmd(&srv, &["HGET", "h", "f2"]), "$2\r\nv2\r\n");
        assert_eq!(cmd(&srv, &["SISMEMBER", "s", "m1"]), ":1\r\n");
        assert_eq!(cmd(&srv, &["GET", "cnt"]), "$1\r\n1\r\n");
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":4\r\n");
        let ttl: i64 = cmd(&srv, &["TTL", "durable"])
            .trim_start_matches(':')
            .trim_end()
            .parse()?;
        assert!(ttl > 990 && ttl <= 1000, "TTL 应当跨重启保留，实际 {}", ttl);
    }
    Ok(())
}

#[test]
fn test_size_mismatch_refused() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("region");
    let mut cfg = Config::small_for_tests();
    drop(Db::open(&path, cfg.clone())?);

    // 同一个文件换个大小打开必须被拒绝
    cfg.region_size *= 2;
    assert!(Db::open(&path, cfg).is_err());
    Ok(())
}

/// 模拟崩溃：一个事务写到一半既不提交也不回滚（泄漏整个守卫），
/// 重新打开后必须回到事务开始前的状态。
#[test]
fn test_torn_transaction_rolls_back_on_reopen() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("region");
    let cfg = Config::small_for_tests();

    {
        let db = Db::open(&path, cfg.clone())?;
        let srv = Server::new(db.clone());
        assert_eq!(cmd(&srv, &["SET", "k", "committed"]), "+OK\r\n");

        // 半途事务：覆盖值 + 插入新 key，然后"断电"
        let mut tx = db.pool.undo();
        tx.begin();
        let v = value::shadow_copy(&db.region, &db.arena, b"torn-write");
        db.set_key(&mut tx, b"k", TAG_BYTES, v).unwrap();
        let v2 = value::shadow_copy(&db.region, &db.arena, b"torn-insert");
        db.set_key(&mut tx, b"torn", TAG_BYTES, v2).unwrap();
        std::mem::forget(tx);
    }

    {
        let srv = Server::new(Db::open(&path, cfg)?);
        // 覆盖被回滚、插入没发生
        assert_eq!(cmd(&srv, &["GET", "k"]), "$9\r\ncommitted\r\n");
        assert_eq!(cmd(&srv, &["EXISTS", "torn"]), ":0\r\n");
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":1\r\n");
        // 恢复后的库照常可写
        assert_eq!(cmd(&srv, &["SET", "k", "after"]), "+OK\r\n");
        assert_eq!(cmd(&srv, &["GET", "k"]), "$5\r\nafter\r\n");
    }
    Ok(())
}

/// 千 key 三阶段：插入 / 覆盖 / 删除，各阶段后 DBSIZE 分别为
/// 1000 / 1000 / 0，且跨重启不变。
#[test]
fn test_thousand_key_phases() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("region");
    let cfg = Config::small_for_tests();

    {
        let srv = Server::new(Db::open(&path, cfg.clone())?);
        for i in 0..1000 {
            let k = i.to_string();
            assert_eq!(cmd(&srv, &["SET", &k, &k]), "+OK\r\n");
        }
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":1000\r\n");
    }

    {
        let srv = Server::new(Db::open(&path, cfg.clone())?);
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":1000\r\n");
        for i in 0..1000 {
            let k = i.to_string();
            let v = (i + 1).to_string();
            assert_eq!(cmd(&srv, &["SET", &k, &v]), "+OK\r\n");
        }
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":1000\r\n");
        // 抽查覆盖后的值
        assert_eq!(cmd(&srv, &["GET", "0"]), "$1\r\n1\r\n");
        assert_eq!(cmd(&srv, &["GET", "999"]), "$4\r\n1000\r\n");
    }

    {
        let srv = Server::new(Db::open(&path, cfg)?);
        for i in 0..1000 {
            assert_eq!(cmd(&srv, &["DEL", &i.to_string()]), ":1\r\n");
        }
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":0\r\n");
    }
    Ok(())
}

/// 同一把 key 写了删、删了写多轮后崩溃恢复，used 计数、链表与
/// 空闲链都得是自洽的（sweep 不应找回任何可达块）。
#[test]
fn test_churn_then_recover_consistent() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("region");
    let cfg = Config::small_for_tests();

    {
        let srv = Server::new(Db::open(&path, cfg.clone())?);
        for round in 0..5 {
            for i in 0..50 {
                let k = format!("churn:{}", i);
                cmd(&srv, &["SET", &k, &format!("r{}", round)]);
            }
            for i in (0..50).step_by(2) {
                cmd(&srv, &["DEL", &format!("churn:{}", i)]);
            }
        }
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":25\r\n");
    }

    {
        let db = Db::open(&path, cfg)?;
        let srv = Server::new(db.clone());
        assert_eq!(cmd(&srv, &["DBSIZE"]), ":25\r\n");
        for i in (1..50).step_by(2) {
            assert_eq!(
                cmd(&srv, &["GET", &format!("churn:{}", i)]),
                "$2\r\nr4\r\n"
            );
        }

        // 字典不变量：用检视钩子对 used / 表大小做体检
        let mut tx = db.pool.readonly();
        tx.begin();
        let stats = db.dict.stats(&mut tx);
        tx.commit().unwrap();
        assert_eq!(stats.used, 25);
        assert!(stats.size0.is_power_of_two());
    }
    Ok(())
}
