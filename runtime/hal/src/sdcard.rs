//! SD card capability and hot-plug tracking
//!
//! The card driver lives as long as the registry, but the card itself may be
//! pulled at any time. The slot records whether a card is present
//! and a generation counter; every [`SdCardHandle`] remembers the generation
//! it was issued at and stops resolving once a removal bumps it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use keel_sync::Lock;

use crate::device::{Device, DriverResult};

/// Mount state reported by an SD card driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdCardState {
    Mounted,
    Unmounted,
    Error,
    /// The card did not answer in time
    Timeout,
}

/// SD card reader
pub trait SdCard: Device {
    /// Where the card's filesystem is (or will be) mounted
    fn mount_path(&self) -> &Path;

    fn state(&self) -> SdCardState;

    fn mount(&self) -> DriverResult<()>;

    fn unmount(&self) -> DriverResult<()>;

    /// Whether a card is physically in the slot
    fn is_inserted(&self) -> bool;

    fn is_mounted(&self) -> bool {
        self.state() == SdCardState::Mounted
    }
}

/// Hot-plug bookkeeping for the board's card reader
pub(crate) struct SdCardSlot {
    device: Arc<dyn SdCard>,
    present: AtomicBool,
    generation: AtomicU64,
    refresh: Lock,
}

impl SdCardSlot {
    pub(crate) fn new(device: Arc<dyn SdCard>) -> Self {
        let present = device.is_inserted();
        Self {
            device,
            present: AtomicBool::new(present),
            generation: AtomicU64::new(0),
            refresh: Lock::new(()),
        }
    }

    pub(crate) fn device(&self) -> &Arc<dyn SdCard> {
        &self.device
    }

    pub(crate) fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mount the card if it is present and not mounted yet
    pub(crate) fn mount_if_present(&self) {
        if !self.is_present() || self.device.is_mounted() {
            return;
        }

        match self.device.mount() {
            Ok(()) => log::info!(
                "Mounted SD card {} at {}",
                self.device.name(),
                self.device.mount_path().display()
            ),
            Err(e) => log::warn!("Failed to mount SD card {}: {}", self.device.name(), e),
        }
    }

    /// Re-probe the slot, returns whether a card is present afterwards
    ///
    /// A removal revokes every handle issued so far.
    pub(crate) fn refresh(&self) -> bool {
        let _guard = self.refresh.scoped();

        let inserted = self.device.is_inserted();
        let was_present = self.is_present();

        match (was_present, inserted) {
            (true, false) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                self.present.store(false, Ordering::Release);
                if self.device.is_mounted() {
                    if let Err(e) = self.device.unmount() {
                        log::warn!("Failed to unmount removed SD card: {e}");
                    }
                }
                log::info!("SD card {} removed", self.device.name());
            }
            (false, true) => {
                self.present.store(true, Ordering::Release);
                log::info!("SD card {} inserted", self.device.name());
                self.mount_if_present();
            }
            _ => {}
        }

        inserted
    }
}

/// Revocable reference to the SD card capability
#[derive(Clone)]
pub struct SdCardHandle {
    slot: Arc<SdCardSlot>,
    generation: u64,
}

impl SdCardHandle {
    pub(crate) fn new(slot: Arc<SdCardSlot>) -> Self {
        let generation = slot.generation();
        Self { slot, generation }
    }

    /// The driver, or `None` once the card this handle was issued for was removed
    pub fn device(&self) -> Option<&Arc<dyn SdCard>> {
        if self.is_revoked() {
            None
        } else {
            Some(self.slot.device())
        }
    }

    pub fn is_revoked(&self) -> bool {
        !self.slot.is_present() || self.slot.generation() != self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl core::fmt::Debug for SdCardHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdCardHandle")
            .field("device", &self.slot.device().name())
            .field("generation", &self.generation)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Reader {
        mount_path: PathBuf,
        inserted: AtomicBool,
        state: Mutex<SdCardState>,
    }

    impl Reader {
        fn new(inserted: bool) -> Arc<Self> {
            Arc::new(Self {
                mount_path: PathBuf::from("/sdcard"),
                inserted: AtomicBool::new(inserted),
                state: Mutex::new(SdCardState::Unmounted),
            })
        }
    }

    impl Device for Reader {
        fn name(&self) -> &str {
            "Reader"
        }
    }

    impl SdCard for Reader {
        fn mount_path(&self) -> &Path {
            &self.mount_path
        }

        fn state(&self) -> SdCardState {
            *self.state.lock().unwrap()
        }

        fn mount(&self) -> DriverResult<()> {
            *self.state.lock().unwrap() = SdCardState::Mounted;
            Ok(())
        }

        fn unmount(&self) -> DriverResult<()> {
            *self.state.lock().unwrap() = SdCardState::Unmounted;
            Ok(())
        }

        fn is_inserted(&self) -> bool {
            self.inserted.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_removal_revokes_handles() {
        let reader = Reader::new(true);
        let slot = Arc::new(SdCardSlot::new(reader.clone()));
        slot.mount_if_present();
        assert!(reader.is_mounted());

        let handle = SdCardHandle::new(slot.clone());
        assert!(handle.device().is_some());

        reader.inserted.store(false, Ordering::SeqCst);
        assert!(!slot.refresh());
        assert!(handle.is_revoked());
        assert!(handle.device().is_none());
        assert!(!reader.is_mounted());
    }

    #[test]
    fn test_reinsertion_issues_fresh_generation() {
        let reader = Reader::new(true);
        let slot = Arc::new(SdCardSlot::new(reader.clone()));
        let stale = SdCardHandle::new(slot.clone());

        reader.inserted.store(false, Ordering::SeqCst);
        slot.refresh();
        reader.inserted.store(true, Ordering::SeqCst);
        assert!(slot.refresh());
        assert!(reader.is_mounted());

        assert!(stale.is_revoked());
        let fresh = SdCardHandle::new(slot.clone());
        assert_eq!(fresh.generation(), 1);
        assert!(fresh.device().is_some());
    }

    #[test]
    fn test_empty_slot_is_not_mounted() {
        let reader = Reader::new(false);
        let slot = SdCardSlot::new(reader.clone());
        slot.mount_if_present();
        assert!(!slot.is_present());
        assert_eq!(reader.state(), SdCardState::Unmounted);
    }
}
