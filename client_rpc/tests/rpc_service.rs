// SPDX-License-Identifier: BSD-3-Clause

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cidr::Ipv4Cidr;

use client_rpc::{wire, RpcClient, RpcServer};
use subnet_pool::{Authorizer, SubnetPool};
use umm_core::feed::named;

fn spawn_server() -> (Arc<RpcServer>, SocketAddr, u64, thread::JoinHandle<()>) {
    let cidr: Ipv4Cidr = "10.1.1.0/29".parse().unwrap();
    let pool = Arc::new(SubnetPool::new(cidr).unwrap());
    let authorizer = Arc::new(Authorizer::new());
    let server = Arc::new(RpcServer::bind(pool, authorizer, named::IDS).unwrap());

    let addr = server.local_addr();
    let secret = server.secret();

    let run_server = Arc::clone(&server);
    let handle = thread::spawn(move || run_server.run());

    (server, addr, secret, handle)
}

fn wait_connectable(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("rpc server at {addr} never became connectable");
}

#[test]
fn reserve_then_release_round_trips() {
    let (server, addr, secret, handle) = spawn_server();
    wait_connectable(addr);

    let mut client = RpcClient::connect(addr, secret).unwrap();
    let a = client.reserve_addr().unwrap().expect("pool should not be exhausted");
    assert!(server.is_allowed(a));

    client.release_addr(a).unwrap();
    assert!(!server.is_allowed(a));

    client.close().unwrap();
    server.stop().unwrap();
    handle.join().unwrap();
}

#[test]
fn release_of_unreserved_address_is_noent() {
    let (server, addr, secret, handle) = spawn_server();
    wait_connectable(addr);

    let mut client = RpcClient::connect(addr, secret).unwrap();
    let stray = Ipv4Addr::new(10, 1, 1, 6);
    let err = client.release_addr(stray).unwrap_err();
    assert_eq!(err.kind(), umm_core::ErrorKind::NoEnt);

    client.close().unwrap();
    server.stop().unwrap();
    handle.join().unwrap();
}

#[test]
fn allow_addr_authorizes_without_reserving() {
    let (server, addr, secret, handle) = spawn_server();
    wait_connectable(addr);

    let mut client = RpcClient::connect(addr, secret).unwrap();
    let addr4 = Ipv4Addr::new(10, 1, 1, 6);
    assert!(!server.is_allowed(addr4));
    client.allow_addr(addr4).unwrap();
    assert!(server.is_allowed(addr4));

    client.close().unwrap();
    server.stop().unwrap();
    handle.join().unwrap();
}

#[test]
fn wrong_secret_is_silently_rejected() {
    let (server, addr, secret, handle) = spawn_server();
    wait_connectable(addr);

    let mut stream = TcpStream::connect(addr).unwrap();
    wire::write_u64(&mut stream, secret.wrapping_add(1)).unwrap();
    wire::write_u32(&mut stream, wire::ACTION_RESERVE_ADDR).unwrap();

    // The server closes the connection after a bad secret instead of
    // replying, so any further read observes EOF.
    let got = wire::read_addr(&mut stream);
    assert!(got.is_err());

    server.stop().unwrap();
    handle.join().unwrap();
}

#[test]
fn pool_exhaustion_reports_unspecified_address() {
    let cidr: Ipv4Cidr = "10.2.2.0/30".parse().unwrap();
    let pool = Arc::new(SubnetPool::new(cidr).unwrap());
    let authorizer = Arc::new(Authorizer::new());
    let server = Arc::new(RpcServer::bind(pool, authorizer, named::IDS).unwrap());
    let addr = server.local_addr();
    let secret = server.secret();

    let run_server = Arc::clone(&server);
    let handle = thread::spawn(move || run_server.run());
    wait_connectable(addr);

    let mut client = RpcClient::connect(addr, secret).unwrap();
    // A /30 has exactly two usable host addresses.
    let first = client.reserve_addr().unwrap();
    assert!(first.is_some());
    let second = client.reserve_addr().unwrap();
    assert!(second.is_some());
    let third = client.reserve_addr().unwrap();
    assert!(third.is_none());

    client.close().unwrap();
    server.stop().unwrap();
    handle.join().unwrap();
}
