//! NWA memory operations and deadline behavior against scripted peers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use cartlink::emunwa::EmuNwaDriver;
use cartlink::{
    AddressSpace, AddressTuple, Deadline, DeviceError, Driver, MemoryMapping, MemoryReadRequest,
    MemoryWriteRequest,
};
use url::Url;

fn bus(addr: u32, mapping: MemoryMapping) -> AddressTuple {
    AddressTuple::new(addr, AddressSpace::SnesABus, mapping)
}

/// Sum of the `;$addr;$size` pair sizes in a CORE_READ/CORE_WRITE line.
fn batch_size(line: &str) -> usize {
    line.trim()
        .split(';')
        .skip(1)
        .skip(1)
        .step_by(2)
        .map(|s| usize::from_str_radix(s.trim_start_matches('$'), 16).unwrap())
        .sum()
}

/// NWA peer serving CORE_READ with a counting pattern and accepting
/// bCORE_WRITE.
fn spawn_memory_peer() -> SocketAddr {
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
                if line.starts_with("CORE_READ ") {
                    let total = batch_size(&line);
                    let mut reply = vec![0u8];
                    reply.extend_from_slice(&(total as u32).to_be_bytes());
                    reply.extend((0..total).map(|i| i as u8));
                    if stream.write_all(&reply).is_err() {
                        break;
                    }
                } else if line.starts_with("bCORE_WRITE ") {
                    let total = batch_size(&line);
                    let mut header = [0u8; 5];
                    if reader.read_exact(&mut header).is_err() {
                        break;
                    }
                    assert_eq!(header[0], 0, "binary block marker");
                    assert_eq!(u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize, total);
                    let mut payload = vec![0u8; total];
                    if reader.read_exact(&mut payload).is_err() {
                        break;
                    }
                    if stream.write_all(b"\n\n").is_err() {
                        break;
                    }
                } else if stream.write_all(b"\nerror:invalid command\n\n").is_err() {
                    break;
                }
            }
        }
    });
    addr
}

#[test]
fn batched_reads_slice_one_binary_reply_in_request_order() {
    let addr = spawn_memory_peer();
    let driver = EmuNwaDriver::new(vec![addr], false);
    let uri = Url::parse(&format!("emunwa://{addr}")).unwrap();
    let device = driver.device(&uri);

    let rsp = device
        .multi_read(
            Deadline::none(),
            &[
                MemoryReadRequest {
                    // FxPakPro-space request exercises the translation.
                    address: AddressTuple::new(
                        0xF5_0010,
                        AddressSpace::FxPakPro,
                        MemoryMapping::LoRom,
                    ),
                    size: 16,
                },
                MemoryReadRequest {
                    address: bus(0x80_8000, MemoryMapping::LoRom),
                    size: 32,
                },
            ],
        )
        .unwrap();

    assert_eq!(rsp.len(), 2);
    assert_eq!(rsp[0].device_address.address, 0x7E_0010);
    assert_eq!(rsp[0].device_address.space, AddressSpace::SnesABus);
    assert_eq!(rsp[0].data, (0..16u32).map(|i| i as u8).collect::<Vec<_>>());
    assert_eq!(rsp[1].device_address.address, 0x80_8000);
    assert_eq!(
        rsp[1].data,
        (16..48u32).map(|i| i as u8).collect::<Vec<_>>()
    );
}

#[test]
fn batched_writes_send_one_binary_block() {
    let addr = spawn_memory_peer();
    let driver = EmuNwaDriver::new(vec![addr], false);
    let uri = Url::parse(&format!("emunwa://{addr}")).unwrap();
    let device = driver.device(&uri);

    let rsp = device
        .multi_write(
            Deadline::none(),
            &[
                MemoryWriteRequest {
                    address: bus(0x7E_0000, MemoryMapping::LoRom),
                    data: vec![1, 2, 3, 4],
                },
                MemoryWriteRequest {
                    address: bus(0x7E_0100, MemoryMapping::LoRom),
                    data: vec![5, 6],
                },
            ],
        )
        .unwrap();

    assert_eq!(rsp.len(), 2);
    assert_eq!(rsp[0].size, 4);
    assert_eq!(rsp[1].size, 2);
    assert_eq!(rsp[1].device_address.address, 0x7E_0100);
}

#[test]
fn deadline_expiry_returns_timeout_without_closing() {
    // A peer that accepts and then never answers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            held.push(stream);
        }
    });

    let driver = EmuNwaDriver::new(vec![addr], false);
    let uri = Url::parse(&format!("emunwa://{addr}")).unwrap();
    let device = driver.device(&uri);

    let reads = [MemoryReadRequest {
        address: bus(0x7E_0000, MemoryMapping::LoRom),
        size: 1,
    }];

    // First call dials the session, then times out on the read.
    let err = device
        .multi_read(Deadline::after(Duration::from_millis(1)), &reads)
        .unwrap_err();
    assert!(matches!(err, DeviceError::Timeout));
    assert_eq!(driver.container().len(), 1, "session must stay registered");

    // With the session already open the expiry is prompt.
    let started = Instant::now();
    let err = device
        .multi_read(Deadline::after(Duration::from_millis(1)), &reads)
        .unwrap_err();
    assert!(matches!(err, DeviceError::Timeout));
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(driver.container().len(), 1);
}
