// https://github.com/ibraheemdev/astra/blob/53ad0859de7a1e2af90d8ae1a6666c9a7a276c03/src/net.rs#L13

use std::{
    io::{self, Read, Write},
    mem::MaybeUninit,
    net::{Shutdown, SocketAddr},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll, Waker},
};

use mio::{Events, Interest, Token};
use shared::indexer::Indexer;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read = 0,
    Write = 1,
}

/// Readiness of one direction of a socket.
///
/// The lowest bit says whether the socket is ready, the other bits count readiness events. A task
/// that hits `WouldBlock` only clears the bit if no event arrived since it last looked, so an
/// event that races with the failed IO call is never lost.
#[derive(Default)]
struct Readiness(AtomicUsize);

impl Readiness {
    const READY: usize = 1;

    fn get(&self) -> Option<usize> {
        let state = self.0.load(Ordering::Acquire);
        (state & Self::READY != 0).then_some(state)
    }

    fn set(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                Some(((state >> 1).wrapping_add(1) << 1) | Self::READY)
            });
    }

    fn clear(&self, observed: usize) {
        let _ = self.0.compare_exchange(
            observed,
            observed & !Self::READY,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}

#[derive(Default)]
struct Source {
    interest: Mutex<[Option<Waker>; 2]>,
    readiness: [Readiness; 2],
}

impl Source {
    fn poll_ready(&self, direction: Direction, cx: &mut Context<'_>) -> Poll<usize> {
        if let Some(state) = self.readiness[direction as usize].get() {
            return Poll::Ready(state);
        }

        // update the waker if required
        {
            let mut interest = lock(&self.interest);

            match &mut interest[direction as usize] {
                Some(existing) if existing.will_wake(cx.waker()) => {
                    /* has the right waker already */
                }
                other => {
                    *other = Some(cx.waker().clone());
                }
            }
        }

        // check if anything changed while we were registering our waker
        match self.readiness[direction as usize].get() {
            Some(state) => Poll::Ready(state),
            None => Poll::Pending,
        }
    }
}

/// Polls socket readiness on a dedicated thread and wakes the tasks waiting on those sockets.
///
/// Every registered socket occupies one of a fixed number of slots; the slot index doubles as
/// the mio token.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
}

impl Reactor {
    const EVENTS_CAPACITY: usize = 256;

    pub fn start(capacity: usize) -> io::Result<Self> {
        let poll = mio::Poll::new()?;

        let shared = Arc::new(Shared {
            registry: poll.registry().try_clone()?,
            slots: Indexer::with_capacity(capacity),
            sources: std::iter::repeat_with(|| Mutex::new(None))
                .take(capacity)
                .collect(),
        });

        let reactor_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(String::from("responder-reactor"))
            .spawn(move || reactor_shared.run(poll))?;

        Ok(Reactor { shared })
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    pub fn slots_in_use(&self) -> usize {
        self.shared.slots.in_use()
    }

    /// Reserve a slot for a new connection, or `None` when all slots are taken.
    pub fn claim(&self) -> Option<Slot> {
        let index = self.shared.slots.claim()?;

        Some(Slot {
            shared: Arc::clone(&self.shared),
            index,
        })
    }

    pub fn register(&self, slot: Slot, tcp_stream: std::net::TcpStream) -> io::Result<TcpStream> {
        debug_assert!(Arc::ptr_eq(&self.shared, &slot.shared));

        tcp_stream.set_nonblocking(true)?;
        let mut tcp_stream = mio::net::TcpStream::from_std(tcp_stream);
        let token = Token(slot.index);

        let source = Arc::new(Source::default());

        let old = lock(&self.shared.sources[slot.index]).replace(Arc::clone(&source));
        debug_assert!(old.is_none());

        // IMPORTANT: only register when everything is in place to handle events on this fd
        if let Err(e) = self.shared.registry.register(
            &mut tcp_stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            lock(&self.shared.sources[slot.index]).take();
            return Err(e);
        }

        Ok(TcpStream {
            tcp_stream,
            source,
            slot,
        })
    }
}

/// A claimed reactor slot. Dropping it makes the slot available again.
pub struct Slot {
    shared: Arc<Shared>,
    index: usize,
}

impl Slot {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.slots.release(self.index);
    }
}

struct Shared {
    registry: mio::Registry,
    slots: Indexer,
    sources: Box<[Mutex<Option<Arc<Source>>>]>,
}

impl Shared {
    fn run(&self, mut poll: mio::Poll) {
        let mut events = Events::with_capacity(Reactor::EVENTS_CAPACITY);
        let mut wakers = Vec::with_capacity(Reactor::EVENTS_CAPACITY);

        loop {
            if let Err(err) = self.poll(&mut poll, &mut events, &mut wakers) {
                log::warn!("Failed to poll reactor: {}", err);
            }

            events.clear()
        }
    }

    fn poll(
        &self,
        poll: &mut mio::Poll,
        events: &mut Events,
        wakers: &mut Vec<Waker>,
    ) -> io::Result<()> {
        if let Err(err) = poll.poll(events, None) {
            return match err.kind() {
                io::ErrorKind::Interrupted => Ok(()),
                _ => Err(err),
            };
        }

        for event in events.iter() {
            let index = event.token().0;

            let source = match self.sources.get(index).map(|source| lock(source).clone()) {
                Some(Some(source)) => source,
                _ => continue,
            };

            let mut interest = lock(&source.interest);

            if event.is_readable() || event.is_read_closed() || event.is_error() {
                source.readiness[Direction::Read as usize].set();

                if let Some(waker) = interest[Direction::Read as usize].take() {
                    wakers.push(waker);
                }
            }

            if event.is_writable() || event.is_write_closed() || event.is_error() {
                source.readiness[Direction::Write as usize].set();

                if let Some(waker) = interest[Direction::Write as usize].take() {
                    wakers.push(waker);
                }
            }
        }

        log::trace!("reactor: waking {} tasks", wakers.len());

        for waker in wakers.drain(..) {
            waker.wake();
        }

        Ok(())
    }
}

/// A non-blocking TCP stream driven by the [`Reactor`], usable as hyper IO.
pub struct TcpStream {
    tcp_stream: mio::net::TcpStream,
    source: Arc<Source>,
    slot: Slot,
}

impl TcpStream {
    pub fn slot(&self) -> usize {
        self.slot.index
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_stream.peer_addr()
    }

    fn poll_io<T>(
        &self,
        direction: Direction,
        mut f: impl FnMut() -> io::Result<T>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<T>> {
        loop {
            let observed = std::task::ready!(self.source.poll_ready(direction, cx));

            match f() {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.source.readiness[direction as usize].clear(observed);
                }
                val => {
                    return Poll::Ready(val);
                }
            }
        }
    }
}

impl hyper::rt::Read for TcpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &*self;

        // SAFETY: only written to below, never read from while uninitialized
        let unfilled = unsafe { buf.as_mut() };
        let mut zeroed = false;

        // only runs once the socket is readable; a pending poll leaves the buffer alone
        let n = std::task::ready!(this.poll_io(
            Direction::Read,
            || {
                if !zeroed {
                    for byte in unfilled.iter_mut() {
                        byte.write(0);
                    }
                    zeroed = true;
                }

                // SAFETY: every byte was zeroed above
                let bytes: &mut [u8] =
                    unsafe { &mut *(&mut *unfilled as *mut [MaybeUninit<u8>] as *mut [u8]) };
                (&this.tcp_stream).read(bytes)
            },
            cx
        ))?;

        // SAFETY: `read` initialized (and we zeroed) the first `n` bytes
        unsafe { buf.advance(n) };

        Poll::Ready(Ok(()))
    }
}

impl hyper::rt::Write for TcpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &*self;
        this.poll_io(Direction::Write, || (&this.tcp_stream).write(buf), cx)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &*self;
        this.poll_io(Direction::Write, || (&this.tcp_stream).flush(), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.tcp_stream.shutdown(Shutdown::Write) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Poll::Ready(Ok(())),
            result => Poll::Ready(result),
        }
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let index = self.slot.index;
        log::trace!("token {} removed from poll", index);

        let _ = self.slot.shared.registry.deregister(&mut self.tcp_stream);

        let _ = lock(&self.slot.shared.sources[index]).take();
        // `self.slot` is dropped after this, releasing the index
    }
}

/// Lock a mutex, treating poisoning as a bug elsewhere that already panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_released_on_drop() {
        let reactor = Reactor::start(2).unwrap();

        let first = reactor.claim().unwrap();
        let second = reactor.claim().unwrap();
        assert_eq!((first.index(), second.index()), (0, 1));
        assert!(reactor.claim().is_none());
        assert_eq!(reactor.slots_in_use(), 2);

        drop(first);
        let third = reactor.claim().unwrap();
        assert_eq!(third.index(), 0);
    }

    #[test]
    fn readiness_clear_loses_to_newer_event() {
        let readiness = Readiness::default();
        assert!(readiness.get().is_none());

        readiness.set();
        let observed = readiness.get().unwrap();

        // an event arrives between the failed IO call and the clear
        readiness.set();
        readiness.clear(observed);
        assert!(readiness.get().is_some());

        let observed = readiness.get().unwrap();
        readiness.clear(observed);
        assert!(readiness.get().is_none());
    }

    #[test]
    fn registered_stream_frees_its_slot_when_dropped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let reactor = Reactor::start(1).unwrap();
        let slot = reactor.claim().unwrap();
        let stream = reactor.register(slot, accepted).unwrap();

        assert_eq!(stream.slot(), 0);
        assert_eq!(stream.peer_addr().unwrap(), client.local_addr().unwrap());
        assert!(reactor.claim().is_none());

        drop(stream);
        assert!(reactor.claim().is_some());
    }

    struct NoopWaker;

    impl std::task::Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    #[test]
    fn pending_read_leaves_the_buffer_untouched() {
        use hyper::rt::Read as _;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let reactor = Reactor::start(1).unwrap();
        let slot = reactor.claim().unwrap();
        let mut stream = reactor.register(slot, accepted).unwrap();

        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);

        let mut raw = [0xAAu8; 64];
        {
            let mut buf = hyper::rt::ReadBuf::new(&mut raw);
            let poll = Pin::new(&mut stream).poll_read(&mut cx, buf.unfilled());
            assert!(poll.is_pending());
        }
        assert!(raw.iter().all(|&byte| byte == 0xAA));

        client.write_all(b"hello").unwrap();

        let mut raw = [0xAAu8; 64];
        let mut buf = hyper::rt::ReadBuf::new(&mut raw);
        for _ in 0..500 {
            match Pin::new(&mut stream).poll_read(&mut cx, buf.unfilled()) {
                Poll::Ready(result) => {
                    result.unwrap();
                    break;
                }
                Poll::Pending => std::thread::sleep(std::time::Duration::from_millis(10)),
            }
        }

        assert_eq!(buf.filled(), b"hello");
    }
}
