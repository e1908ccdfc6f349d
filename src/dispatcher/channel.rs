//! Messages posted from any thread and run on the dispatcher's thread.
//!
//! Every message pairs one queue entry with one byte on a pipe watched by
//! the dispatcher, so each readable byte runs exactly one message. The
//! capacity is capped below the smallest common pipe buffer so a byte is
//! never dropped while its message sits in the queue.

use crate::dispatcher::core::Dispatcher;
use crate::error::{Error, Result};
use crate::queue::LfQueue;
use crate::reactor::waker;
use crate::reactor::{InputMode, PollBackend};

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Largest queue a channel will allocate.
pub const MAX_CAPACITY: usize = 4096;

type Message = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: LfQueue<Message>,
    read: RawFd,
    write: RawFd,
}

impl Drop for Shared {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

/// Attaches message delivery to a [`Dispatcher`].
pub struct MessageChannel;

impl MessageChannel {
    /// Watches a fresh pipe on `dispatcher` and returns the sending side.
    ///
    /// `capacity` is rounded up to a power of two and capped at
    /// [`MAX_CAPACITY`].
    ///
    /// # Example
    /// ```ignore
    /// let sender = MessageChannel::attach(&mut dispatcher, 64)?;
    /// let remote = sender.clone();
    /// thread::spawn(move || remote.post(|| println!("ran on the dispatcher thread")));
    /// dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL)?;
    /// ```
    pub fn attach<B: PollBackend>(
        dispatcher: &mut Dispatcher<B>,
        capacity: usize,
    ) -> Result<MessageSender> {
        let capacity = capacity.clamp(2, MAX_CAPACITY).next_power_of_two();
        let (read, write) = waker::pipe()?;
        let shared = Arc::new(Shared {
            queue: LfQueue::new(capacity),
            read,
            write,
        });

        let receiver = shared.clone();
        dispatcher.add_handle(read, InputMode::READ, move |fd, _| {
            let mut byte = 0u8;
            let n = unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
            if n != 1 {
                return false;
            }
            match receiver.queue.pop() {
                Some(message) => {
                    message();
                    true
                }
                None => false,
            }
        })?;

        Ok(MessageSender { shared })
    }

    /// Stops delivering `sender`'s messages on `dispatcher`.
    ///
    /// Messages still queued are dropped along with the last sender.
    pub fn detach<B: PollBackend>(dispatcher: &mut Dispatcher<B>, sender: &MessageSender) -> bool {
        dispatcher.remove_handle(sender.shared.read).is_some()
    }
}

/// Posts messages to the dispatcher a channel was attached to.
#[derive(Clone)]
pub struct MessageSender {
    shared: Arc<Shared>,
}

impl MessageSender {
    /// Queues `message` and wakes the dispatcher.
    ///
    /// Fails with [`Error::Full`] when the queue has no room.
    pub fn post<F>(&self, message: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .queue
            .push(Box::new(message))
            .map_err(|_| Error::Full)?;
        waker::notify(self.shared.write);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Messages posted but not yet run.
    pub fn pending(&self) -> usize {
        self.shared.queue.used()
    }
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("fd", &self.shared.read)
            .field("pending", &self.pending())
            .field("capacity", &self.capacity())
            .finish()
    }
}
