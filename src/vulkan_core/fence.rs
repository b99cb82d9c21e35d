use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;

use super::device::Device;
use super::{vk_try, Error, Result};

/// How the host waits for a fence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Blocks inside the driver until the value is reached or the timeout expires.
    #[default]
    Blocking,
    /// Busy-polls the completed value, keeping one core spinning.
    Spin,
}

impl FromStr for WaitMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" | "block" => Ok(Self::Blocking),
            "spin" => Ok(Self::Spin),
            other => Err(format!("unknown wait mode {other:?}, expected `blocking` or `spin`")),
        }
    }
}

/// Polls `completed` until it reports at least `target`, giving up once
/// `timeout` has passed.
pub fn spin_wait(
    target: u64,
    timeout: Duration,
    mut completed: impl FnMut() -> Result<u64>,
) -> Result<u64> {
    let deadline = Instant::now() + timeout;
    loop {
        let value = completed()?;
        if value >= target {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(Error::WaitTimedOut {
                target,
                completed: value,
                timeout,
            });
        }
        std::hint::spin_loop();
    }
}

/// Monotonic counter signaled by the queue, backed by a timeline semaphore.
pub struct Fence {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}
impl Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("semaphore", &self.semaphore)
            .finish()
    }
}

impl Fence {
    pub fn create(device: &Arc<Device>, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { vk_try!(device.create_semaphore(&info, None))? };
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    pub fn completed_value(&self) -> Result<u64> {
        unsafe { vk_try!(self.device.get_semaphore_counter_value(self.semaphore)) }
    }

    /// Waits until the completed value reaches `value` and returns it.
    #[profiling::function]
    pub fn wait(&self, value: u64, mode: WaitMode, timeout: Duration) -> Result<u64> {
        log::trace!("Waiting for fence value {value} ({mode:?}, timeout {timeout:?})");
        match mode {
            WaitMode::Spin => spin_wait(value, timeout, || self.completed_value()),
            WaitMode::Blocking => {
                let semaphores = [self.semaphore];
                let values = [value];
                let wait_info = vk::SemaphoreWaitInfo::default()
                    .semaphores(&semaphores)
                    .values(&values);
                let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
                match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
                    Ok(()) => self.completed_value(),
                    Err(vk::Result::TIMEOUT) => Err(Error::WaitTimedOut {
                        target: value,
                        completed: self.completed_value()?,
                        timeout,
                    }),
                    Err(result) => Err(Error::Driver {
                        call: "self.device.wait_semaphores(&wait_info, timeout_ns)",
                        result,
                    }),
                }
            }
        }
    }

    pub fn vk(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn spin_wait_returns_once_target_is_reached() {
        let polls = Cell::new(0);
        let values = [0, 0, 0, 1];
        let value = spin_wait(1, Duration::from_secs(5), || {
            let i = polls.get();
            polls.set(i + 1);
            Ok(values[i])
        })
        .unwrap();
        assert_eq!(value, 1);
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn spin_wait_never_stops_below_target() {
        let polls = Cell::new(0u64);
        let value = spin_wait(3, Duration::from_secs(5), || {
            polls.set(polls.get() + 1);
            Ok(polls.get() / 2)
        })
        .unwrap();
        assert!(value >= 3);
        assert_eq!(polls.get(), 6);
    }

    #[test]
    fn spin_wait_accepts_values_past_target() {
        assert_eq!(spin_wait(1, Duration::ZERO, || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn spin_wait_times_out() {
        let err = spin_wait(1, Duration::from_millis(10), || Ok(0)).unwrap_err();
        assert!(matches!(
            err,
            Error::WaitTimedOut {
                target: 1,
                completed: 0,
                ..
            }
        ));
    }

    #[test]
    fn spin_wait_propagates_driver_errors() {
        let err = spin_wait(1, Duration::from_secs(5), || {
            Err(Error::Driver {
                call: "poll",
                result: vk::Result::ERROR_DEVICE_LOST,
            })
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Driver {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        ));
    }

    #[test]
    fn parse_wait_mode() {
        assert_eq!("spin".parse::<WaitMode>(), Ok(WaitMode::Spin));
        assert_eq!("Blocking".parse::<WaitMode>(), Ok(WaitMode::Blocking));
        assert!("sleep".parse::<WaitMode>().is_err());
    }
}
