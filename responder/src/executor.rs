// https://github.com/Hexilee/async-io-demo/blob/master/src/executor.rs

use std::{
    collections::VecDeque,
    future::Future,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, OnceLock,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, JoinHandle, Thread},
};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A fixed pool of worker threads, each running many tasks.
///
/// A task stays on the worker it was first given to. Workers park when none of their tasks can
/// make progress and are unparked by the task wakers.
pub struct Executor {
    workers: Box<[Arc<Worker>]>,
    next: AtomicUsize,
}

impl Executor {
    pub fn start(worker_count: usize) -> io::Result<Self> {
        if worker_count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "an executor needs at least one worker",
            ));
        }

        let mut workers = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let worker = Arc::new(Worker {
                id,
                queue: Mutex::new(RunQueue::default()),
                thread: OnceLock::new(),
            });

            let handle = worker.spawn()?;
            let _ = worker.thread.set(handle.thread().clone());

            workers.push(worker);
        }

        Ok(Executor {
            workers: workers.into_boxed_slice(),
            next: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Hand a future to the next worker, round-robin.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].push(Box::pin(future));
    }
}

#[derive(Default)]
struct RunQueue {
    /// futures that this worker has not polled yet
    incoming: Vec<BoxFuture>,
    /// indices of woken tasks
    woken: VecDeque<usize>,
}

struct Worker {
    id: usize,
    queue: Mutex<RunQueue>,
    thread: OnceLock<Thread>,
}

struct Task {
    future: BoxFuture,
    waker: Waker,
}

struct TaskWaker {
    worker: Arc<Worker>,
    index: usize,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        log::trace!("wake task {} on worker {}", self.index, self.worker.id);

        self.worker.queue().woken.push_back(self.index);
        self.worker.unpark();
    }
}

impl Worker {
    fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let worker = Arc::clone(self);

        thread::Builder::new()
            .name(format!("responder-worker-{}", self.id))
            .spawn(move || worker.run())
    }

    fn queue(&self) -> MutexGuard<'_, RunQueue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, future: BoxFuture) {
        self.queue().incoming.push(future);
        self.unpark();
    }

    fn unpark(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    fn run(self: Arc<Self>) {
        let mut tasks: Vec<Option<Task>> = Vec::new();
        let mut free: Vec<usize> = Vec::new();

        loop {
            let (incoming, woken) = {
                let mut queue = self.queue();
                (
                    std::mem::take(&mut queue.incoming),
                    std::mem::take(&mut queue.woken),
                )
            };

            if incoming.is_empty() && woken.is_empty() {
                // a wake between releasing the lock and parking makes `park` return immediately
                thread::park();
                continue;
            }

            for future in incoming {
                let index = match free.pop() {
                    Some(index) => index,
                    None => {
                        tasks.push(None);
                        tasks.len() - 1
                    }
                };

                let waker = Waker::from(Arc::new(TaskWaker {
                    worker: Arc::clone(&self),
                    index,
                }));

                tasks[index] = Some(Task { future, waker });
                self.poll_task(&mut tasks, &mut free, index);
            }

            for index in woken {
                self.poll_task(&mut tasks, &mut free, index);
            }
        }
    }

    fn poll_task(&self, tasks: &mut [Option<Task>], free: &mut Vec<usize>, index: usize) {
        // stale wakeups for finished tasks are expected
        let Some(task) = tasks.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        let mut cx = Context::from_waker(&task.waker);
        let result = catch_unwind(AssertUnwindSafe(|| task.future.as_mut().poll(&mut cx)));

        let done = match result {
            Ok(Poll::Pending) => false,
            Ok(Poll::Ready(())) => true,
            Err(_) => {
                log::error!("worker {}: task {index} panicked, dropping it", self.id);
                true
            }
        };

        if done {
            tasks[index] = None;
            free.push(index);
        }
    }
}
