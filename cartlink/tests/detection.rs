//! Concurrent NWA detection against scripted peers.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use cartlink::emunwa::EmuNwaDriver;
use cartlink::Driver;

/// A minimal NWA peer: answers EMULATOR_INFO with an ASCII record and
/// keeps serving until the client hangs up.
fn spawn_nwa_peer(name: &'static str, version: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let reply = match line.trim() {
                    "EMULATOR_INFO" => {
                        format!("\nname:{name}\nversion:{version}\nid:1\n\n")
                    }
                    _ => "\nerror:invalid command\n\n".to_string(),
                };
                if stream.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
        }
    });
    addr
}

/// A port that refuses connections: bind a listener, note the port, drop
/// it.
fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn detect_returns_only_the_live_peer() {
    let live = spawn_nwa_peer("snes9x", "1.62");
    let dead = dead_addr();

    let driver = EmuNwaDriver::new(vec![live, dead], false);

    let started = Instant::now();
    let devs = driver.detect().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(devs.len(), 1);
    assert_eq!(devs[0].display_name, "snes9x 1.62 (emunwa)");
    assert_eq!(devs[0].kind, "emunwa");
    assert_eq!(devs[0].system, "snes");
    assert_eq!(devs[0].uri.as_str(), format!("emunwa://{live}"));

    // Probes run in parallel under a four-frame budget each; two probes
    // must complete well inside 150ms.
    assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
}

#[test]
fn detect_is_repeatable_and_recomputes_descriptors() {
    let live = spawn_nwa_peer("bsnes", "115");
    let driver = EmuNwaDriver::new(vec![live], false);

    let first = driver.detect().unwrap();
    let second = driver.detect().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].display_name, second[0].display_name);
}

#[test]
fn detect_with_no_peers_returns_empty() {
    let driver = EmuNwaDriver::new(vec![dead_addr(), dead_addr()], false);
    assert!(driver.detect().unwrap().is_empty());
}

#[test]
fn peer_answering_garbage_is_not_detected() {
    // Replies with a bare binary blob instead of an ASCII record.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            let _ = reader.read_line(&mut line);
            let _ = stream.write_all(&[0, 0, 0, 0, 2, 0xAB, 0xCD]);
        }
    });

    let driver = EmuNwaDriver::new(vec![addr], false);
    assert!(driver.detect().unwrap().is_empty());
}
