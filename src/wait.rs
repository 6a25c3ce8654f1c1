//! Blocking waits on an absolute wall clock deadline.
//!
//! A plain sleep measures elapsed time, so it drifts when the clock is changed and
//! keeps counting from where it stopped when the machine resumes from suspend.
//! [`WaitWorker`] arms a `timerfd` on `CLOCK_REALTIME` with an absolute expiry instead,
//! so a wait for 07:00 ends at 07:00 wall clock time, or straight after resume if the
//! machine slept through it.
//!
//! [`WaitWorker::wait`] blocks, so it belongs on its own thread. [`WaitWorker::spawn`]
//! sets that up and reports back over the owner's channel.

use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::{
    communication::{Message, MessageType, Sender},
    error::WaitError,
};

/// deadline meaning nothing is scheduled
pub const NO_DEADLINE: i64 = -1;

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// realtime timer, readable once its absolute expiry passes
#[derive(Debug)]
struct TimerFd(OwnedFd);

impl TimerFd {
    fn new() -> Result<Self, WaitError> {
        // SAFETY: no pointers are passed, the result is checked before use
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_REALTIME, libc::TFD_CLOEXEC | libc::TFD_NONBLOCK)
        };
        if fd < 0 {
            return Err(WaitError::Create {
                what: "timerfd",
                source: last_error(),
            });
        }
        // SAFETY: fd was just created and is owned by nothing else
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn arm(&self, deadline: i64) -> Result<(), WaitError> {
        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: timer_seconds(deadline)?,
                tv_nsec: 0,
            },
        };
        // SAFETY: spec outlives the call and old_value may be null
        let result = unsafe {
            libc::timerfd_settime(
                self.0.as_raw_fd(),
                libc::TFD_TIMER_ABSTIME | libc::TFD_TIMER_CANCEL_ON_SET,
                &spec,
                std::ptr::null_mut(),
            )
        };
        if result < 0 {
            return Err(WaitError::Arm {
                deadline,
                source: last_error(),
            });
        }
        Ok(())
    }

    /// true if the timer really expired
    ///
    /// Re-arming resets the expiry count, so a stale wakeup reads nothing. A wall clock
    /// change cancels the read, the caller re-arms and the absolute deadline still holds.
    fn expired(&self) -> Result<bool, WaitError> {
        match read_u64(self.0.as_raw_fd()) {
            Ok(expirations) => Ok(expirations > 0),
            Err(err) if would_block(&err) => Ok(false),
            Err(err) if err.raw_os_error() == Some(libc::ECANCELED) => {
                log::debug!("wall clock changed while waiting");
                Ok(false)
            }
            Err(err) => Err(WaitError::Poll(err)),
        }
    }
}

/// used to interrupt a blocked wait
#[derive(Debug)]
struct EventFd(OwnedFd);

impl EventFd {
    fn new() -> Result<Self, WaitError> {
        // SAFETY: no pointers are passed, the result is checked before use
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(WaitError::Create {
                what: "eventfd",
                source: last_error(),
            });
        }
        // SAFETY: fd was just created and is owned by nothing else
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn notify(&self) {
        let one: u64 = 1;
        // SAFETY: writes exactly the 8 bytes of `one`
        let written = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                std::ptr::addr_of!(one).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        // only fails when the counter is about to overflow, which still wakes the reader
        if written < 0 {
            log::warn!("couldn't wake wait worker: {}", last_error());
        }
    }

    fn drain(&self) -> Result<(), WaitError> {
        match read_u64(self.0.as_raw_fd()) {
            Ok(_) => Ok(()),
            Err(err) if would_block(&err) => Ok(()),
            Err(err) => Err(WaitError::Poll(err)),
        }
    }
}

fn read_u64(fd: RawFd) -> io::Result<u64> {
    let mut value: u64 = 0;
    // SAFETY: reads at most the 8 bytes of `value`
    let read = unsafe {
        libc::read(
            fd,
            std::ptr::addr_of_mut!(value).cast(),
            std::mem::size_of::<u64>(),
        )
    };
    if read < 0 {
        return Err(last_error());
    }
    Ok(value)
}

/// blocks until one of `fds` is readable, returns which ones are
fn poll_readable<const N: usize>(fds: [RawFd; N]) -> Result<[bool; N], WaitError> {
    let mut polled = fds.map(|fd| libc::pollfd {
        fd,
        events: libc::POLLIN | libc::POLLPRI,
        revents: 0,
    });
    loop {
        // SAFETY: the pointer and length describe `polled`
        let result = unsafe { libc::poll(polled.as_mut_ptr(), N as libc::nfds_t, -1) };
        if result >= 0 {
            break;
        }
        let err = last_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(WaitError::Poll(err));
        }
    }
    if polled.iter().any(|fd| fd.revents & libc::POLLNVAL != 0) {
        return Err(WaitError::InvalidTimer);
    }
    Ok(polled.map(|fd| fd.revents & (libc::POLLIN | libc::POLLPRI | libc::POLLERR) != 0))
}

fn describe(deadline: i64) -> String {
    DateTime::from_timestamp(deadline, 0).map_or_else(
        || deadline.to_string(),
        |at| at.with_timezone(&Local).to_rfc2822(),
    )
}

#[derive(Debug)]
struct Target {
    deadline: i64,
    /// bumped on every retarget so an expiry of an older deadline is ignored
    generation: u64,
    fired: bool,
    stopped: bool,
}

/// How a [`WaitWorker::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// the deadline passed
    Finished,
    /// nothing to wait for: the deadline is negative or has already fired
    Idle,
    /// [`WaitWorker::stop`] was called
    Stopped,
}

/// Waits for an absolute deadline in epoch seconds.
///
/// A negative deadline means there is nothing scheduled. The worker is shared between the
/// thread blocked in [`Self::wait`] and the owner retargeting it with [`Self::set_new_time`].
#[derive(Debug)]
pub struct WaitWorker {
    timer: TimerFd,
    wake: EventFd,
    target: Mutex<Target>,
}

impl WaitWorker {
    /// # Errors
    /// if the timer or wake handles can't be created
    pub fn new(deadline: i64) -> Result<Self, WaitError> {
        Ok(Self {
            timer: TimerFd::new()?,
            wake: EventFd::new()?,
            target: Mutex::new(Target {
                deadline,
                generation: 0,
                fired: false,
                stopped: false,
            }),
        })
    }

    // the target is plain data, a panic while holding it can't leave it half written
    fn target(&self) -> MutexGuard<'_, Target> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn deadline(&self) -> i64 {
        self.target().deadline
    }

    /// Replaces the deadline. A wait in progress drops the old deadline and waits for
    /// this one instead, the old one never fires.
    pub fn set_new_time(&self, deadline: i64) {
        {
            let mut target = self.target();
            target.deadline = deadline;
            target.generation += 1;
            target.fired = false;
        }
        if deadline < 0 {
            log::debug!("nothing to wait for");
        } else {
            log::debug!("start waiting: {}", describe(deadline));
        }
        self.wake.notify();
    }

    /// makes the current and every later [`Self::wait`] return [`WaitOutcome::Stopped`]
    pub fn stop(&self) {
        self.target().stopped = true;
        self.wake.notify();
    }

    /// Blocks until the deadline passes.
    ///
    /// Returns straight away with [`WaitOutcome::Idle`] if the deadline is negative or
    /// already fired, a deadline in the past but not yet fired finishes immediately.
    ///
    /// # Errors
    /// [`WaitError::InvalidTimer`] if the timer handle became invalid, other errors if
    /// arming or polling it failed
    pub fn wait(&self) -> Result<WaitOutcome, WaitError> {
        loop {
            let (deadline, generation) = {
                let target = self.target();
                if target.stopped {
                    return Ok(WaitOutcome::Stopped);
                }
                if target.deadline < 0 || target.fired {
                    return Ok(WaitOutcome::Idle);
                }
                (target.deadline, target.generation)
            };
            self.timer.arm(deadline)?;

            let [timer_ready, woken] =
                poll_readable([self.timer.0.as_raw_fd(), self.wake.0.as_raw_fd()])?;
            if woken {
                self.wake.drain()?;
            }
            if timer_ready && self.timer.expired()? {
                let mut target = self.target();
                if target.generation == generation && !target.stopped {
                    target.fired = true;
                    log::debug!("waiting end");
                    return Ok(WaitOutcome::Finished);
                }
            }
        }
    }

    /// blocks until the worker is retargeted or stopped
    ///
    /// # Errors
    /// if polling the wake handle fails
    pub fn park(&self) -> Result<(), WaitError> {
        let [_] = poll_readable([self.wake.0.as_raw_fd()])?;
        self.wake.drain()
    }

    /// Runs the worker on its own thread.
    ///
    /// Every finished wait is sent to `sender` as [`MessageType::WaitFinished`], failures as
    /// [`MessageType::WaitError`]. After either the thread sleeps until the deadline is
    /// changed through the returned handle.
    ///
    /// # Errors
    /// if the handles or the thread can't be created
    pub fn spawn(deadline: i64, alarm_id: Uuid, sender: Sender) -> Result<WaitHandle, WaitError> {
        let worker = Arc::new(Self::new(deadline)?);
        if deadline >= 0 {
            log::debug!("start waiting: {}", describe(deadline));
        }
        let thread = thread::Builder::new()
            .name(format!("alarm-wait-{alarm_id}"))
            .spawn({
                let worker = Arc::clone(&worker);
                move || run(&worker, alarm_id, &sender)
            })
            .map_err(|source| WaitError::Create {
                what: "wait thread",
                source,
            })?;
        Ok(WaitHandle {
            worker,
            thread: Some(thread),
        })
    }
}

// an all zero it_value disarms the timer instead of firing at the epoch
fn timer_seconds(deadline: i64) -> Result<libc::time_t, WaitError> {
    libc::time_t::try_from(deadline.max(1)).map_err(|_| WaitError::Arm {
        deadline,
        source: io::Error::new(io::ErrorKind::InvalidInput, "deadline out of range for time_t"),
    })
}

fn run(worker: &WaitWorker, alarm_id: Uuid, sender: &Sender) {
    loop {
        let kind = match worker.wait() {
            Ok(WaitOutcome::Stopped) => return,
            Ok(WaitOutcome::Idle) => None,
            Ok(WaitOutcome::Finished) => Some(MessageType::WaitFinished),
            Err(e) => {
                log::warn!("waiting for alarm {alarm_id} failed: {e}");
                Some(MessageType::WaitError(e.to_string()))
            }
        };
        if let Some(kind) = kind {
            if sender.send(Message::new(kind, alarm_id)).is_err() {
                log::debug!("owner of alarm {alarm_id} is gone, stopping its wait");
                return;
            }
        }
        if let Err(e) = worker.park() {
            log::warn!("wait worker for alarm {alarm_id} can't be woken: {e}");
            // the owner is told once, the thread can't do anything useful anymore
            if sender
                .send(Message::new(MessageType::WaitError(e.to_string()), alarm_id))
                .is_err()
            {
                log::debug!("owner of alarm {alarm_id} is gone, dropping the wait error");
            }
            return;
        }
    }
}

/// A [`WaitWorker`] running on its own thread.
///
/// Dropping the handle stops the thread, waits for it and closes the timer.
#[derive(Debug)]
pub struct WaitHandle {
    worker: Arc<WaitWorker>,
    thread: Option<JoinHandle<()>>,
}

impl WaitHandle {
    /// see [`WaitWorker::set_new_time`]
    pub fn set_new_time(&self, deadline: i64) {
        self.worker.set_new_time(deadline);
    }

    #[must_use]
    pub fn deadline(&self) -> i64 {
        self.worker.deadline()
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.worker.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("wait thread panicked");
            }
        }
    }
}
