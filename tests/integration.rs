//! End-to-end scenarios E1-E7: each spins up a real `Server` on a background
//! thread, listening on a real TCP port, and drives it with a plain
//! `TcpStream` the way an actual client would. No async runtime: the
//! single-threaded reactor just runs on its own `std::thread`, same as the
//! teacher has no concurrency model to borrow here either.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use cutis_server::config::{Config, SaveParam};
use cutis_server::eventloop::ae_main;
use cutis_server::rdb;
use cutis_server::server::Server;

fn spawn_server(config: Config) {
    thread::spawn(move || {
        let dump_file = config.dump_file.clone();
        let mut server = Server::new(config);
        server.init();
        let _ = rdb::load(&mut server, &dump_file);
        ae_main(&mut server);
    });
}

fn connect(port: u16) -> TcpStream {
    let addr = format!("127.0.0.1:{port}");
    for _ in 0..100 {
        if let Ok(s) = TcpStream::connect(&addr) {
            s.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
            return s;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server on port {port} never became reachable");
}

fn expect(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).expect("read_exact failed");
    assert_eq!(buf, expected, "expected {:?}, got {:?}", String::from_utf8_lossy(expected), String::from_utf8_lossy(&buf));
}

fn read_until_crlf(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).expect("read byte");
        out.push(byte[0]);
        if out.ends_with(b"\r\n") {
            break;
        }
    }
    out.truncate(out.len() - 2);
    String::from_utf8(out).unwrap()
}

fn base_config(port: u16) -> Config {
    let mut cfg = Config::new();
    cfg.port = port;
    cfg.bind_addr = "127.0.0.1".to_string();
    cfg.save_params = Vec::new();
    cfg.dump_file = format!("tests_tmp_{}_{}.cdb", port, std::process::id());
    let _ = std::fs::remove_file(&cfg.dump_file);
    cfg
}

#[test]
fn e1_inline_set_get_del() {
    let cfg = base_config(17101);
    spawn_server(cfg);
    let mut s = connect(17101);

    s.write_all(b"SET foo 3\r\nbar\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    s.write_all(b"GET foo\r\n").unwrap();
    expect(&mut s, b"3\r\nbar\r\n");

    s.write_all(b"DEL foo\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    s.write_all(b"GET foo\r\n").unwrap();
    expect(&mut s, b"nil\r\n");
}

#[test]
fn e2_incr_on_missing() {
    let cfg = base_config(17102);
    spawn_server(cfg);
    let mut s = connect(17102);

    s.write_all(b"INCR counter\r\n").unwrap();
    expect(&mut s, b"1\r\n");

    s.write_all(b"INCR counter\r\n").unwrap();
    expect(&mut s, b"2\r\n");

    s.write_all(b"INCR counter\r\n").unwrap();
    expect(&mut s, b"3\r\n");
}

#[test]
fn e3_list_lrange_negative() {
    let cfg = base_config(17103);
    spawn_server(cfg);
    let mut s = connect(17103);

    s.write_all(b"RPUSH L 1\r\nA\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");
    s.write_all(b"RPUSH L 1\r\nB\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");
    s.write_all(b"RPUSH L 1\r\nC\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    s.write_all(b"LRANGE L 0 -1\r\n").unwrap();
    expect(&mut s, b"3\r\n1\r\nA\r\n1\r\nB\r\n1\r\nC\r\n");
}

#[test]
fn e4_sinter_sorts_by_size() {
    let cfg = base_config(17104);
    spawn_server(cfg);
    let mut s = connect(17104);

    s.write_all(b"SADD S1 1\r\na\r\n").unwrap();
    expect(&mut s, b"1\r\n");
    s.write_all(b"SADD S1 1\r\nb\r\n").unwrap();
    expect(&mut s, b"1\r\n");
    s.write_all(b"SADD S2 1\r\nb\r\n").unwrap();
    expect(&mut s, b"1\r\n");

    s.write_all(b"SINTER S1 S2\r\n").unwrap();
    expect(&mut s, b"1\r\n1\r\nb\r\n");
}

#[test]
fn e5_snapshot_round_trip() {
    let mut writer_cfg = base_config(17105);
    writer_cfg.databases = 4;
    let dump_file = writer_cfg.dump_file.clone();
    spawn_server(writer_cfg);
    let mut s = connect(17105);

    // DB 0: one key of each type.
    s.write_all(b"SET strkey 4\r\nval0\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");
    s.write_all(b"RPUSH listkey 1\r\nx\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");
    s.write_all(b"SADD setkey 2\r\nm1\r\n").unwrap();
    expect(&mut s, b"1\r\n");
    s.write_all(b"SADD setkey 2\r\nm2\r\n").unwrap();
    expect(&mut s, b"1\r\n");

    // DB 3: one string key.
    s.write_all(b"SELECT 3\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");
    s.write_all(b"SET strkey3 4\r\nval3\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    s.write_all(b"SAVE\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    let mut reader_cfg = base_config(17106);
    reader_cfg.databases = 4;
    reader_cfg.dump_file = dump_file;
    spawn_server(reader_cfg);
    let mut r = connect(17106);

    r.write_all(b"GET strkey\r\n").unwrap();
    expect(&mut r, b"4\r\nval0\r\n");
    r.write_all(b"LRANGE listkey 0 -1\r\n").unwrap();
    expect(&mut r, b"1\r\n1\r\nx\r\n");
    r.write_all(b"SCARD setkey\r\n").unwrap();
    expect(&mut r, b"2\r\n");
    r.write_all(b"SISMEMBER setkey m1\r\n").unwrap();
    expect(&mut r, b"1\r\n");
    r.write_all(b"SISMEMBER setkey m2\r\n").unwrap();
    expect(&mut r, b"1\r\n");

    r.write_all(b"SELECT 1\r\n").unwrap();
    expect(&mut r, b"+OK\r\n");
    r.write_all(b"DBSIZE\r\n").unwrap();
    expect(&mut r, b"0\r\n");
    r.write_all(b"SELECT 2\r\n").unwrap();
    expect(&mut r, b"+OK\r\n");
    r.write_all(b"DBSIZE\r\n").unwrap();
    expect(&mut r, b"0\r\n");

    r.write_all(b"SELECT 3\r\n").unwrap();
    expect(&mut r, b"+OK\r\n");
    r.write_all(b"GET strkey3\r\n").unwrap();
    expect(&mut r, b"4\r\nval3\r\n");
}

#[test]
fn e6_bgsave_policy_advances_lastsave() {
    let mut cfg = base_config(17107);
    cfg.save_params = vec![SaveParam { seconds: 1, changes: 1 }];
    spawn_server(cfg);
    let mut s = connect(17107);

    s.write_all(b"LASTSAVE\r\n").unwrap();
    let before: u128 = read_until_crlf(&mut s).parse().unwrap();

    s.write_all(b"SET k 1\r\nv\r\n").unwrap();
    expect(&mut s, b"+OK\r\n");

    thread::sleep(Duration::from_millis(3500));

    s.write_all(b"LASTSAVE\r\n").unwrap();
    let after: u128 = read_until_crlf(&mut s).parse().unwrap();

    assert!(after > before, "expected LASTSAVE to advance after the save-policy threshold was hit (before={before}, after={after})");
}

#[test]
fn e7_idle_timeout_closes_connection() {
    let mut cfg = base_config(17108);
    cfg.timeout_secs = 1;
    spawn_server(cfg);
    let mut s = connect(17108);

    // Nothing sent; the cron tick sweeps idle clients every 10 loops.
    thread::sleep(Duration::from_millis(11500));

    let mut buf = [0u8; 16];
    let n = s.read(&mut buf).expect("read after idle sweep");
    assert_eq!(n, 0, "expected the idle connection to be closed with no reply");
}
