//! End-to-end tests for the asynchronous event engine, driven over real
//! loopback sockets.
//!
//! The engine is a process-wide singleton, so every test takes `init_engine`
//! which serializes init/cleanup behind one lock.

use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use sockwatch::{
    cleanup, deregister, init, register, AsyncCallback, ErrorKind, EventMask,
    Socket,
};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Long enough for at least one full reactor pass (500 ms poll timeout).
const QUIET: Duration = Duration::from_millis(800);

struct EngineGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

impl Drop for EngineGuard {
    fn drop(&mut self) {
        let _ = cleanup();
    }
}

fn init_engine() -> EngineGuard {
    static SERIAL: Mutex<()> = Mutex::new(());
    let guard = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _ = env_logger::builder().is_test(true).try_init();
    init().expect("failed to initialize engine");
    EngineGuard(guard)
}

fn tcp() -> Arc<Socket> {
    Socket::new(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap()
}

fn listener() -> (Arc<Socket>, u16) {
    let socket = tcp();
    socket.set_reuseaddr(true).unwrap();
    socket.bind("127.0.0.1", "0").unwrap();
    socket.listen(8).unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

/// A callback that forwards every delivered event set to a channel.
fn collector() -> (AsyncCallback, mpsc::Receiver<EventMask>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: AsyncCallback = Arc::new(move |_socket, events| {
        let _ = tx.lock().unwrap().send(events);
    });
    (callback, rx)
}

fn assert_quiet(rx: &mpsc::Receiver<EventMask>) {
    match rx.recv_timeout(QUIET) {
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        Ok(events) => panic!("unexpected events: {:?}", events),
    }
}

#[test]
fn pending_connect_success() {
    let _engine = init_engine();
    let (_listener, port) = listener();

    let client = tcp();
    client.set_nonblocking(true).unwrap();
    // Start the connect before registering: an unconnected TCP socket polls
    // as hung up, so the first reactor pass must observe it mid-connect.
    client.connect("127.0.0.1", &port.to_string()).unwrap();
    let (callback, rx) = collector();
    register(
        &client,
        Some(callback),
        EventMask::CONNECT | EventMask::WRITE | EventMask::CLOSE | EventMask::ERROR,
    )
    .unwrap();

    let events = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(events.contains(EventMask::CONNECT), "got {:?}", events);
    assert!(!events.contains(EventMask::CONNFAIL));
    assert!(!events.contains(EventMask::WRITE));

    // The connect edge is one-shot: the pending flag is gone and WRITE left
    // the mask, so an established, writable socket produces no events until
    // the user re-enables them.
    assert!(!client.is_connecting());
    assert!(!client.event_mask().contains(EventMask::WRITE));
    assert_quiet(&rx);

    deregister(&client).unwrap();
}

#[test]
fn pending_connect_refused() {
    let _engine = init_engine();

    // Find a port that refuses connections by closing the listener that
    // briefly owned it.
    let (closing, port) = listener();
    closing.close().unwrap();

    let client = tcp();
    client.set_nonblocking(true).unwrap();
    client.connect("127.0.0.1", &port.to_string()).unwrap();
    let (callback, rx) = collector();
    register(
        &client,
        Some(callback),
        EventMask::CONNECT | EventMask::WRITE | EventMask::CLOSE | EventMask::ERROR,
    )
    .unwrap();

    let events = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(events.contains(EventMask::CONNFAIL), "got {:?}", events);
    assert!(!events.contains(EventMask::CONNECT));

    // CONNFAIL fires exactly once; the terminal pass removed the entry.
    assert_quiet(&rx);
    assert_eq!(
        deregister(&client).unwrap_err().kind(),
        ErrorKind::NotRegistered
    );
}

#[test]
fn passive_accept() {
    let _engine = init_engine();
    let (server, port) = listener();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: AsyncCallback = Arc::new(move |socket, events| {
        assert!(!events.contains(EventMask::READ), "got READ on a listener");
        if events.contains(EventMask::ACCEPT) {
            if let Ok((peer, addr)) = socket.accept() {
                let _ = tx.lock().unwrap().send((peer, addr));
            }
        }
    });
    register(
        &server,
        Some(callback),
        EventMask::READ | EventMask::ERROR | EventMask::CLOSE,
    )
    .unwrap();

    let first = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (peer, addr) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(addr, first.local_addr().unwrap());
    assert_eq!(peer.peer_addr().unwrap(), first.local_addr().unwrap());

    // Each inbound connection produces its own accept.
    let second = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (_, addr) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(addr, second.local_addr().unwrap());

    deregister(&server).unwrap();
}

#[test]
fn peer_shutdown_delivers_close_and_removes_entry() {
    let _engine = init_engine();
    let (server, port) = listener();

    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (conn, _) = server.accept().unwrap();

    let (callback, rx) = collector();
    register(
        &conn,
        Some(callback),
        EventMask::READ | EventMask::CLOSE | EventMask::ERROR,
    )
    .unwrap();

    client.shutdown(std::net::Shutdown::Both).unwrap();
    drop(client);

    let events = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(events.contains(EventMask::CLOSE), "got {:?}", events);

    // The callback did not close or drop the handle, but the terminal event
    // still removed the registry entry and no further events arrive for it.
    assert_eq!(
        deregister(&conn).unwrap_err().kind(),
        ErrorKind::NotRegistered
    );
    assert_quiet(&rx);
}

#[test]
fn deregister_from_callback_stops_delivery() {
    let _engine = init_engine();
    let (server, port) = listener();

    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (conn, _) = server.accept().unwrap();

    // The callback deregisters its own socket on the first event; the
    // registry lock is re-entrant so this must not deadlock.
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: AsyncCallback = Arc::new(move |socket, events| {
        deregister(socket).unwrap();
        let _ = tx.lock().unwrap().send(events);
    });
    register(
        &conn,
        Some(callback),
        EventMask::READ | EventMask::CLOSE | EventMask::ERROR,
    )
    .unwrap();

    use std::io::Write;
    let mut client = client;
    client.write_all(b"ping").unwrap();

    let events = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(events.contains(EventMask::READ), "got {:?}", events);

    // More traffic, but the socket is gone from the registry.
    client.write_all(b"pong").unwrap();
    assert_quiet(&rx);
}

#[test]
fn deregister_race_with_reactor() {
    let _engine = init_engine();
    let (server, port) = listener();

    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (conn, _) = server.accept().unwrap();

    let writer = thread::spawn(move || {
        use std::io::Write;
        let mut client = client;
        for _ in 0..50 {
            if client.write_all(b"x").is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    });

    // Hammer register/deregister from this thread while the reactor is
    // translating events for the same descriptor.
    let (callback, rx) = collector();
    for _ in 0..50 {
        register(
            &conn,
            Some(callback.clone()),
            EventMask::READ | EventMask::CLOSE | EventMask::ERROR,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(1));
        match deregister(&conn) {
            Ok(()) => {}
            // The reactor may have removed the entry first on a terminal
            // event; losing that race is the point of the test.
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotRegistered),
        }
    }
    writer.join().unwrap();
    drop(rx);
}

#[test]
fn cleanup_with_live_registrations() {
    let _engine = init_engine();

    let sockets: Vec<_> = (0..3).map(|_| listener().0).collect();
    let (callback, rx) = collector();
    for socket in &sockets {
        register(socket, Some(callback.clone()), EventMask::NORMAL).unwrap();
    }

    // Cleanup joins the reactor, logs one diagnostic per dangling entry and
    // succeeds; the handles stay alive and owned by us.
    cleanup().unwrap();
    for socket in &sockets {
        assert!(!socket.is_closed());
    }

    // No callbacks fire after cleanup returns, even for fresh readiness.
    let port = sockets[0].local_addr().unwrap().port();
    let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert_quiet(&rx);

    // The registry was drained: after a fresh init the old registrations
    // are gone.
    init().unwrap();
    assert_eq!(
        deregister(&sockets[0]).unwrap_err().kind(),
        ErrorKind::NotRegistered
    );
}

#[test]
fn empty_mask_with_callback_is_deregister() {
    let _engine = init_engine();
    let (server, _) = listener();

    let (callback, _rx) = collector();
    register(&server, Some(callback.clone()), EventMask::NORMAL).unwrap();

    // A callback together with an empty mask still means deregister.
    register(&server, Some(callback), EventMask::empty()).unwrap();
    assert_eq!(
        deregister(&server).unwrap_err().kind(),
        ErrorKind::NotRegistered
    );
}

#[test]
fn reregistration_updates_mask_and_callback() {
    let _engine = init_engine();
    let (server, _) = listener();

    let (first, _rx1) = collector();
    register(&server, Some(first), EventMask::NORMAL).unwrap();
    assert_eq!(server.event_mask(), EventMask::NORMAL);

    let (second, _rx2) = collector();
    register(
        &server,
        Some(second),
        EventMask::READ | EventMask::ERROR,
    )
    .unwrap();
    assert_eq!(server.event_mask(), EventMask::READ | EventMask::ERROR);

    deregister(&server).unwrap();
}

#[test]
fn closed_descriptor_is_reclassified_invalid() {
    let _engine = init_engine();
    let (server, port) = listener();

    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (conn, _) = server.accept().unwrap();

    let (callback, rx) = collector();
    register(&conn, Some(callback), EventMask::NORMAL).unwrap();

    // Close the descriptor behind the library's back; the reactor must see
    // POLLNVAL, deliver INVALID and drop the entry.
    unsafe {
        libc::close(conn.descriptor());
    }

    let events = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(events.contains(EventMask::INVALID), "got {:?}", events);
    assert_eq!(
        deregister(&conn).unwrap_err().kind(),
        ErrorKind::NotRegistered
    );
    drop(client);

    // The descriptor is gone; keep the handle from double-closing it.
    std::mem::forget(conn);
}
