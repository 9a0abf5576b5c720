use std::io;
use std::net::{self, SocketAddr};
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;

use crate::config::Config;
use crate::error::Result;
use crate::executor::Executor;
use crate::handler::hello_world;
use crate::reactor::{Reactor, TcpStream};

/// A bound responder: listener, reactor and worker pool.
pub struct Server {
    listener: net::TcpListener,
    reactor: Reactor,
    executor: Executor,
    keep_alive: bool,
}

impl Server {
    pub fn bind(config: &Config) -> Result<Server> {
        config.validate()?;

        let listener = net::TcpListener::bind((config.host.as_str(), config.port))?;
        let reactor = Reactor::start(config.max_connections)?;
        let executor = Executor::start(config.workers)?;

        log::debug!(
            "bound {} with {} workers and {} connection slots",
            listener.local_addr()?,
            executor.worker_count(),
            reactor.capacity()
        );

        Ok(Server {
            listener,
            reactor,
            executor,
            keep_alive: config.keep_alive,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub fn run(self) -> Result<()> {
        let id = std::thread::current().id();
        log::info!("accepting connections on thread {id:?}");

        for (i, stream) in self.listener.incoming().enumerate() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("main: failed to accept connection {i}: {e}");
                    if is_resource_exhaustion(&e) {
                        // the pending connection stays in the backlog until a descriptor frees up
                        std::thread::sleep(ACCEPT_BACKOFF);
                    }
                    continue;
                }
            };

            let Some(slot) = self.reactor.claim() else {
                // no space for another connection
                log::warn!("main: no free connection slot, dropping connection {i}");
                let _ = stream.shutdown(net::Shutdown::Both);
                continue;
            };

            let tcp_stream = match self.reactor.register(slot, stream) {
                Ok(tcp_stream) => tcp_stream,
                Err(e) => {
                    log::warn!("main: failed to register connection {i}: {e}");
                    continue;
                }
            };

            log::debug!("new connection {i} (slot = {})", tcp_stream.slot());

            self.executor
                .spawn(serve_connection(i, tcp_stream, self.keep_alive));

            log::trace!("main spawned future for connection {i}");
        }

        Ok(())
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

async fn serve_connection(i: usize, tcp_stream: TcpStream, keep_alive: bool) {
    let slot = tcp_stream.slot();

    let connection = http1::Builder::new()
        .keep_alive(keep_alive)
        .title_case_headers(true)
        .serve_connection(tcp_stream, service_fn(hello_world::<Incoming>));

    match connection.await {
        Ok(()) => log::debug!("connection {i} (slot = {slot}) closed"),
        Err(e) => log::debug!("connection {i} (slot = {slot}) failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_backs_off() {
        assert!(is_resource_exhaustion(&io::Error::from_raw_os_error(
            libc::EMFILE
        )));
        assert!(is_resource_exhaustion(&io::Error::from_raw_os_error(
            libc::ENFILE
        )));
    }

    #[test]
    fn per_connection_errors_do_not_back_off() {
        assert!(!is_resource_exhaustion(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));

        #[cfg(unix)]
        assert!(!is_resource_exhaustion(&io::Error::from_raw_os_error(
            libc::ECONNABORTED
        )));
    }
}
