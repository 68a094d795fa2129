//! Boot oracle and the try-before-you-buy confirmation gate.

use embassy_time::Duration;

use crate::partition::Partition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    #[error("boot state unavailable")]
    StateUnavailable,
    #[error("failed to mark image valid")]
    MarkValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RebootError {
    #[error("boot state unavailable")]
    StateUnavailable,
    #[error("failed to select boot partition")]
    SelectPartition,
    #[error("reset did not happen")]
    NoReset,
}

/// Bootloader capabilities.
#[allow(async_fn_in_trait)]
pub trait BootController {
    /// Partition reported by the boot diagnostics, `None` when they are
    /// absent or malformed.
    fn running_partition(&mut self) -> Option<Partition>;

    /// Mark the running image good. Succeeds when nothing is pending.
    fn confirm_partition(&mut self) -> Result<(), ConfirmError>;

    /// Arm `partition` for a trial boot and reset after `delay`.
    ///
    /// Only returns when the reboot could not be performed.
    async fn reboot_to_partition(&mut self, partition: Partition, delay: Duration) -> RebootError;
}

impl<T: BootController + ?Sized> BootController for &mut T {
    fn running_partition(&mut self) -> Option<Partition> {
        T::running_partition(self)
    }

    fn confirm_partition(&mut self) -> Result<(), ConfirmError> {
        T::confirm_partition(self)
    }

    async fn reboot_to_partition(&mut self, partition: Partition, delay: Duration) -> RebootError {
        T::reboot_to_partition(self, partition, delay).await
    }
}

/// Answers "where am I running" and "where may I write".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootOracle {
    current: Partition,
    reported: bool,
}

impl BootOracle {
    /// Resolve the running partition once. Missing diagnostics fall back to
    /// partition A.
    pub fn from_controller<B: BootController + ?Sized>(boot: &mut B) -> Self {
        match boot.running_partition() {
            Some(current) => Self {
                current,
                reported: true,
            },
            None => {
                log::warn!("boot: no partition reported, assuming A");
                Self {
                    current: Partition::A,
                    reported: false,
                }
            }
        }
    }

    pub const fn new(current: Partition) -> Self {
        Self {
            current,
            reported: true,
        }
    }

    pub const fn current(&self) -> Partition {
        self.current
    }

    /// The only partition an update may be written to.
    pub const fn target(&self) -> Partition {
        self.current.other()
    }

    /// `false` when the current partition is the default-to-A guess.
    pub const fn is_reported(&self) -> bool {
        self.reported
    }
}

/// First thing the firmware does after reset: disarm the automatic revert.
pub fn confirm_boot<B: BootController + ?Sized>(boot: &mut B) -> Result<(), ConfirmError> {
    match boot.confirm_partition() {
        Ok(()) => {
            log::info!("boot: image confirmed");
            Ok(())
        }
        Err(err) => {
            log::error!("boot: confirm failed err={}", err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Diagnostics {
        running: Option<Partition>,
        pending: bool,
        confirms: u32,
    }

    impl BootController for Diagnostics {
        fn running_partition(&mut self) -> Option<Partition> {
            self.running
        }

        fn confirm_partition(&mut self) -> Result<(), ConfirmError> {
            self.confirms += 1;
            self.pending = false;
            Ok(())
        }

        async fn reboot_to_partition(&mut self, _: Partition, _: Duration) -> RebootError {
            RebootError::NoReset
        }
    }

    fn diagnostics(running: Option<Partition>) -> Diagnostics {
        Diagnostics {
            running,
            pending: true,
            confirms: 0,
        }
    }

    #[test]
    fn target_is_never_current() {
        for running in [Partition::A, Partition::B] {
            let oracle = BootOracle::from_controller(&mut diagnostics(Some(running)));
            assert_eq!(oracle.current(), running);
            assert_ne!(oracle.target(), oracle.current());
            assert!(oracle.is_reported());
        }
    }

    #[test]
    fn missing_diagnostics_default_to_a() {
        let oracle = BootOracle::from_controller(&mut diagnostics(None));
        assert_eq!(oracle.current(), Partition::A);
        assert_eq!(oracle.target(), Partition::B);
        assert!(!oracle.is_reported());
    }

    #[test]
    fn confirmation_is_idempotent() {
        let mut boot = diagnostics(Some(Partition::B));
        assert_eq!(confirm_boot(&mut boot), Ok(()));
        assert!(!boot.pending);
        assert_eq!(confirm_boot(&mut boot), Ok(()));
        assert_eq!(boot.confirms, 2);
    }
}
