//! HTTP server lifecycle.
//!
//! `HttpServer` owns the configuration and the routing table. `start` binds
//! the listening socket and spawns one listener thread plus a fixed pool of
//! worker threads; `stop` signals them, wakes them and joins them.

use crate::config::Config;
use crate::error::ServerError;
use crate::http::{Method, Request};
use crate::router::{HandlerResult, Router};
use crate::runtime::{create_listener, Listener, Poller, Worker, WorkerHandle};
use mio::Waker;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Threads and handles that exist only while the server runs.
struct Running {
    local_addr: SocketAddr,
    listener_waker: Waker,
    listener_thread: Option<JoinHandle<()>>,
    workers: Vec<WorkerHandle>,
    worker_threads: Vec<JoinHandle<()>>,
}

pub struct HttpServer {
    config: Config,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
    state: Option<Running>,
}

impl HttpServer {
    /// Create a server for `host:port` with default settings.
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_config(Config {
            host: host.to_string(),
            port,
            ..Config::default()
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self::with_router(config, Router::new())
    }

    pub fn with_router(config: Config, router: Router) -> Self {
        Self {
            config,
            router: Arc::new(router),
            running: Arc::new(AtomicBool::new(false)),
            state: None,
        }
    }

    /// Register `handler` for `(path, method)`, replacing any previous one.
    ///
    /// Only possible while the server is stopped.
    pub fn register_handler<F>(
        &mut self,
        path: &str,
        method: Method,
        handler: F,
    ) -> Result<(), ServerError>
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        let router = Arc::get_mut(&mut self.router).ok_or(ServerError::RoutesFrozen)?;
        router.route(path, method, handler);
        Ok(())
    }

    /// Bind, listen and spawn the listener and worker threads.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        self.config.validate()?;
        let addr = self.resolve()?;
        let std_listener =
            create_listener(addr, self.config.backlog).map_err(ServerError::Socket)?;
        let local_addr = std_listener.local_addr().map_err(ServerError::Socket)?;
        let mut listener = mio::net::TcpListener::from_std(std_listener);

        // Every multiplexer exists before the first thread starts.
        let listener_poller =
            Poller::new(self.config.max_events).map_err(ServerError::Multiplex)?;
        Listener::register(&listener_poller, &mut listener).map_err(ServerError::Multiplex)?;
        let listener_waker = listener_poller.waker().map_err(ServerError::Multiplex)?;

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let poller = Poller::new(self.config.max_events).map_err(ServerError::Multiplex)?;
            let waker = Arc::new(poller.waker().map_err(ServerError::Multiplex)?);
            let (sender, receiver) = crossbeam_channel::unbounded();
            let handle = WorkerHandle::new(id, sender, waker);
            let worker = Worker::new(
                id,
                poller,
                receiver,
                Arc::clone(&self.router),
                Arc::clone(&self.running),
                &self.config,
            );
            workers.push((handle, worker));
        }

        self.running.store(true, Ordering::Release);

        let mut state = Running {
            local_addr,
            listener_waker,
            listener_thread: None,
            workers: Vec::with_capacity(workers.len()),
            worker_threads: Vec::with_capacity(workers.len()),
        };

        for (handle, worker) in workers {
            let worker_id = handle.id();
            let spawned = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker.run() {
                        error!(worker = worker_id, error = %e, "Worker failed");
                    }
                });

            match spawned {
                Ok(thread) => {
                    state.workers.push(handle);
                    state.worker_threads.push(thread);
                }
                Err(e) => {
                    self.shutdown(state);
                    return Err(ServerError::Spawn(e));
                }
            }
        }

        let accept_loop = Listener::new(
            listener,
            listener_poller,
            state.workers.clone(),
            Arc::clone(&self.running),
            self.config.poll_timeout,
        );
        let spawned = thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || {
                if let Err(e) = accept_loop.run() {
                    error!(error = %e, "Listener failed");
                }
            });

        match spawned {
            Ok(thread) => state.listener_thread = Some(thread),
            Err(e) => {
                self.shutdown(state);
                return Err(ServerError::Spawn(e));
            }
        }

        info!(
            addr = %local_addr,
            workers = self.config.workers,
            version = %self.config.http_version,
            "Server started"
        );

        self.state = Some(state);
        Ok(())
    }

    /// Signal all threads to exit, wake them and wait for them.
    ///
    /// Connections still open are closed by their workers, and the
    /// listening socket is closed once the listener thread has exited.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        let state = self.state.take().ok_or(ServerError::NotRunning)?;
        self.shutdown(state);
        info!("Server stopped");
        Ok(())
    }

    fn shutdown(&mut self, mut state: Running) {
        self.running.store(false, Ordering::Release);

        if let Err(e) = state.listener_waker.wake() {
            warn!(error = %e, "Failed to wake listener");
        }
        if let Some(thread) = state.listener_thread.take() {
            if thread.join().is_err() {
                error!("Listener thread panicked");
            }
        }

        for worker in &state.workers {
            worker.wake();
        }
        for (worker_id, thread) in state.worker_threads.drain(..).enumerate() {
            if thread.join().is_err() {
                error!(worker = worker_id, "Worker thread panicked");
            }
        }
    }

    fn resolve(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.config.host.clone()))?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// The configured port. See [`HttpServer::local_addr`] for the bound one.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.as_ref().map(|state| state.local_addr)
    }

    /// Connections assigned to each worker since start, in worker order.
    pub fn worker_loads(&self) -> Vec<usize> {
        self.state
            .as_ref()
            .map(|state| state.workers.iter().map(WorkerHandle::assigned).collect())
            .unwrap_or_default()
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if self.state.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Response, StatusCode};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    fn say_hello(_request: &Request) -> HandlerResult {
        let mut response = Response::new(StatusCode::Ok);
        response.set_header("Content-Type", "text/plain");
        response.set_content("Hello, world\n");
        Ok(response)
    }

    fn test_server(workers: usize) -> HttpServer {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers,
            poll_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        let mut server = HttpServer::from_config(config);
        server.register_handler("/", Method::Get, say_hello).unwrap();
        server.register_handler("/", Method::Head, say_hello).unwrap();
        server
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value.trim().parse().unwrap())
            .unwrap_or(0)
    }

    /// Read one response: the headers, then Content-Length body bytes unless
    /// `head_only`.
    fn read_response(stream: &mut TcpStream, head_only: bool) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = std::str::from_utf8(&data[..end]).unwrap();
                let body_len = if head_only { 0 } else { content_length(head) };
                if data.len() >= end + 4 + body_len {
                    return String::from_utf8(data).unwrap();
                }
            }
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before full response");
            data.extend_from_slice(&chunk[..n]);
        }
    }

    fn exchange(addr: SocketAddr, request: &[u8], head_only: bool) -> String {
        let mut stream = connect(addr);
        stream.write_all(request).unwrap();
        read_response(&mut stream, head_only)
    }

    #[test]
    fn test_get_hello() {
        let mut server = test_server(2);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let response = exchange(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", false);
        assert_eq!(
            response,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 13\r\n\r\nHello, world\n"
        );

        server.stop().unwrap();
    }

    #[test]
    fn test_head_and_errors() {
        let mut server = test_server(2);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let response = exchange(addr, b"HEAD / HTTP/1.1\r\n\r\n", true);
        assert_eq!(
            response,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 13\r\n\r\n"
        );

        let response = exchange(addr, b"GET / HTTP/1.0\r\n\r\n", false);
        assert!(response.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));

        let response = exchange(addr, b"GET /missing HTTP/1.1\r\n\r\n", false);
        assert_eq!(response, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");

        let response = exchange(addr, b"not http\r\n\r\n", false);
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        server.stop().unwrap();
    }

    #[test]
    fn test_keeps_connection_between_requests() {
        let mut server = test_server(1);
        server.start().unwrap();
        let mut stream = connect(server.local_addr().unwrap());

        for _ in 0..3 {
            stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
            let response = read_response(&mut stream, false);
            assert!(response.ends_with("Hello, world\n"));
        }

        server.stop().unwrap();
    }

    #[test]
    fn test_round_robin_distribution() {
        let mut server = test_server(3);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let clients: Vec<TcpStream> = (0..7).map(|_| connect(addr)).collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.worker_loads().iter().sum::<usize>() < 7 {
            assert!(Instant::now() < deadline, "connections not distributed");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.worker_loads(), vec![3, 2, 2]);

        drop(clients);
        server.stop().unwrap();
    }

    #[test]
    fn test_concurrent_clients() {
        let mut server = test_server(4);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let clients: Vec<_> = (0..16)
            .map(|_| {
                thread::spawn(move || exchange(addr, b"GET / HTTP/1.1\r\n\r\n", false))
            })
            .collect();

        for client in clients {
            assert!(client.join().unwrap().ends_with("\r\n\r\nHello, world\n"));
        }

        server.stop().unwrap();
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut server = test_server(1);
        assert!(matches!(server.stop(), Err(ServerError::NotRunning)));

        server.start().unwrap();
        assert!(server.is_running());
        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
        assert!(matches!(
            server.register_handler("/late", Method::Get, say_hello),
            Err(ServerError::RoutesFrozen)
        ));

        server.stop().unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
        assert!(matches!(server.stop(), Err(ServerError::NotRunning)));

        // Stopped again: the routing table is writable
        server
            .register_handler("/late", Method::Get, say_hello)
            .unwrap();
    }

    #[test]
    fn test_stop_closes_listener() {
        let mut server = test_server(2);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();
        server.stop().unwrap();

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_restart() {
        let mut server = test_server(1);
        server.start().unwrap();
        server.stop().unwrap();

        server.start().unwrap();
        let response = exchange(server.local_addr().unwrap(), b"GET / HTTP/1.1\r\n\r\n", false);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        server.stop().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 0,
            ..Config::default()
        };
        let mut server = HttpServer::from_config(config);
        assert!(matches!(server.start(), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_invalid_address() {
        let mut server = HttpServer::new("256.0.0.1", 8080);
        assert!(matches!(server.start(), Err(ServerError::InvalidAddress(_))));
        assert!(!server.is_running());
    }
}
