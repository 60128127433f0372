//! SD card lookup and layout loading against simulated boards

use std::path::PathBuf;

use keel_hal::{CapabilityKind, HalRegistry};
use keel_hal_mock::{SimulatedBoard, SDCARD_MOUNT_PATH};
use keel_paths::{find_first_mounted_sdcard_path, PartitionLayout, Paths};

#[test]
fn test_mounted_card_is_found() {
    let (board, _) = SimulatedBoard::default().build();
    let hal = HalRegistry::boot(&board).unwrap();

    assert_eq!(
        find_first_mounted_sdcard_path(&hal),
        Some(PathBuf::from(SDCARD_MOUNT_PATH))
    );
}

/// No card reader at all: lookup fails without crashing
#[test]
fn test_board_without_card_reader() {
    let (board, _) = SimulatedBoard::default()
        .without(CapabilityKind::SdCard)
        .build();
    let hal = HalRegistry::boot(&board).unwrap();

    assert!(hal.get_capability(CapabilityKind::SdCard).is_none());
    assert_eq!(find_first_mounted_sdcard_path(&hal), None);
}

#[test]
fn test_removed_card_is_not_found() {
    let (board, devices) = SimulatedBoard::default().build();
    let hal = HalRegistry::boot(&board).unwrap();

    devices.sdcard.remove();
    hal.refresh(CapabilityKind::SdCard).unwrap();
    assert_eq!(find_first_mounted_sdcard_path(&hal), None);
}

#[test]
fn test_layout_from_toml() {
    let layout: PartitionLayout = toml::from_str(
        r#"
        system = "/flash/system"
        data = "/flash/data"
        user = "/sd/user"
        "#,
    )
    .unwrap();
    let paths = Paths::new(layout);

    assert_eq!(paths.temp_path(), PathBuf::from("/flash/data/tmp"));
    assert_eq!(paths.app_user_path("com.example.app"), PathBuf::from("/sd/user/com.example.app"));

    let empty: PartitionLayout = toml::from_str("").unwrap();
    assert_eq!(empty, PartitionLayout::default());
    assert!(toml::from_str::<PartitionLayout>("cache = \"/x\"").is_err());
}
