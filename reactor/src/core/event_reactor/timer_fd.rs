// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd itimerspec CLOEXEC NONBLOCK EAGAIN

//! Kernel timer objects backing [`Reactor`] timers.
//!
//! Each timer registration owns one [`timerfd`] on the monotonic clock. The descriptor
//! becomes readable when the timer expires, which is what lets timers sit in the same
//! [`mio::Poll`] wait set as sockets and signals. Reading it returns the number of
//! expirations since the last read, and clears readability.
//!
//! [`Reactor`]: crate::Reactor
//! [`timerfd`]: https://man7.org/linux/man-pages/man2/timerfd_create.2.html

use super::{ReactorError, TimerMode};
use rustix::{io::Errno,
             time::{Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags, Timespec,
                    timerfd_create, timerfd_settime}};
use std::{os::fd::OwnedFd, time::Duration};

pub const MICROS_PER_SEC: u32 = 1_000_000;

/// Converts a `sec.usec` period into a [`Duration`].
///
/// # Errors
///
/// [`ReactorError::InvalidTimerPeriod`] for a zero period, or `usec` of a full second or
/// more.
pub fn validate_period(sec: u64, usec: u32) -> Result<Duration, ReactorError> {
    if usec >= MICROS_PER_SEC || (sec == 0 && usec == 0) {
        return Err(ReactorError::InvalidTimerPeriod { sec, usec });
    }
    Ok(Duration::from_secs(sec) + Duration::from_micros(u64::from(usec)))
}

/// Creates a non blocking, close on exec [`timerfd`] and arms it. The first expiry is
/// one `period` from now; [`TimerMode::Repeating`] timers then expire every `period`.
///
/// # Errors
///
/// - [`ReactorError::TimerCreation`] if the descriptor can't be created.
/// - [`ReactorError::TimerRegistration`] if it can't be armed.
///
/// [`timerfd`]: https://man7.org/linux/man-pages/man2/timerfd_create.2.html
pub fn create_armed_timer_fd(
    period: Duration,
    mode: TimerMode,
) -> Result<OwnedFd, ReactorError> {
    let fd = timerfd_create(
        TimerfdClockId::Monotonic,
        TimerfdFlags::NONBLOCK | TimerfdFlags::CLOEXEC,
    )
    .map_err(|errno| ReactorError::TimerCreation(errno.into()))?;

    let value = to_timespec(period)?;
    let interval = match mode {
        TimerMode::Repeating => value,
        TimerMode::OneShot => Timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
    };

    timerfd_settime(
        &fd,
        TimerfdTimerFlags::empty(),
        &Itimerspec {
            it_interval: interval,
            it_value: value,
        },
    )
    .map_err(|errno| ReactorError::TimerRegistration(errno.into()))?;

    Ok(fd)
}

/// Reads and clears the expiration counter. Returns `0` if the descriptor was not
/// readable after all (`EAGAIN`).
///
/// # Errors
///
/// Any other read error.
pub fn read_expirations(fd: &OwnedFd) -> std::io::Result<u64> {
    let mut buf = [0_u8; 8];
    match rustix::io::read(fd, &mut buf[..]) {
        Ok(8) => Ok(u64::from_ne_bytes(buf)),
        Ok(_) | Err(Errno::AGAIN) => Ok(0),
        Err(errno) => Err(errno.into()),
    }
}

fn to_timespec(period: Duration) -> Result<Timespec, ReactorError> {
    let invalid = || ReactorError::InvalidTimerPeriod {
        sec: period.as_secs(),
        usec: period.subsec_micros(),
    };
    Ok(Timespec {
        tv_sec: i64::try_from(period.as_secs()).map_err(|_| invalid())?,
        tv_nsec: i64::from(period.subsec_nanos()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;
    use test_case::test_case;

    #[test_case(0, 0 ; "zero period")]
    #[test_case(0, 1_000_000 ; "usec of a full second")]
    #[test_case(3, 2_000_000 ; "usec above a second")]
    fn test_invalid_period(sec: u64, usec: u32) {
        assert!(matches!(
            validate_period(sec, usec),
            Err(ReactorError::InvalidTimerPeriod { .. })
        ));
    }

    #[test_case(1, 0, Duration::from_secs(1))]
    #[test_case(0, 200_000, Duration::from_millis(200))]
    #[test_case(2, 500, Duration::from_micros(2_000_500))]
    fn test_valid_period(sec: u64, usec: u32, expected: Duration) {
        assert_eq!(validate_period(sec, usec).unwrap(), expected);
    }

    #[test]
    fn test_unexpired_timer_reads_zero() {
        let fd = create_armed_timer_fd(Duration::from_secs(60), TimerMode::OneShot).unwrap();
        assert_eq!(read_expirations(&fd).unwrap(), 0);
    }

    #[test]
    fn test_repeating_timer_counts_expirations() {
        let fd =
            create_armed_timer_fd(Duration::from_millis(10), TimerMode::Repeating).unwrap();
        thread::sleep(Duration::from_millis(55));

        let expirations = read_expirations(&fd).unwrap();
        assert!(expirations >= 3, "expirations = {expirations}");
        // Reading clears the counter.
        assert!(read_expirations(&fd).unwrap() <= 1);
    }

    #[test]
    fn test_oneshot_timer_expires_once() {
        let fd = create_armed_timer_fd(Duration::from_millis(5), TimerMode::OneShot).unwrap();
        thread::sleep(Duration::from_millis(30));

        assert_eq!(read_expirations(&fd).unwrap(), 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(read_expirations(&fd).unwrap(), 0);
    }
}
