// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use labwired_intc::system::builder::{build_platform_from_file, Platform};
use labwired_intc::{GpioReceiver, NumberedGpioOutput};
use std::path::PathBuf;

const EXTI: u64 = 0x4001_0400;
const PLIC: u64 = 0x0C00_0000;
const VIC: u64 = 0x1014_0000;
const INTMUX: u64 = 0x4002_4000;
const ROUTER_MISC: u64 = 0x4000_5000;

const PLIC_PENDING: u64 = PLIC + 0x1000;
const PLIC_ENABLE: u64 = PLIC + 0x2000;
const PLIC_CLAIM: u64 = PLIC + 0x20_0004;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn board() -> anyhow::Result<Platform> {
    init_logging();
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/mixed_board.yaml");
    build_platform_from_file(&path)
}

fn arm_exti_line3(platform: &Platform) -> anyhow::Result<()> {
    let bus = &platform.bus;
    bus.write_u32(PLIC + 4 * 7, 3)?;
    bus.write_u32(PLIC_ENABLE, 1 << 7)?;
    bus.write_u32(EXTI, 1 << 3)?; // IMR
    bus.write_u32(EXTI + 0x08, 1 << 3)?; // RTSR
    Ok(())
}

#[test]
fn test_exti_edge_reaches_plic_through_wiring() -> anyhow::Result<()> {
    let platform = board()?;
    arm_exti_line3(&platform)?;
    let bus = &platform.bus;
    let exti = platform.controller("exti").unwrap();
    let plic = platform.controller("plic").unwrap();

    exti.on_gpio(3, true);
    assert_eq!(bus.read_u32(PLIC_PENDING)?, 1 << 7);
    assert!(plic.connections()[0].is_set());

    assert_eq!(bus.read_u32(PLIC_CLAIM)?, 7);
    assert!(!plic.connections()[0].is_set());

    // Acknowledge at the EXTI, then complete at the PLIC.
    bus.write_u32(EXTI + 0x14, 1 << 3)?;
    bus.write_u32(PLIC_CLAIM, 7)?;
    assert_eq!(bus.read_u32(PLIC_PENDING)?, 0);
    assert_eq!(bus.read_u32(PLIC_CLAIM)?, 0);
    Ok(())
}

#[test]
fn test_level_still_high_at_complete_repends() -> anyhow::Result<()> {
    let platform = board()?;
    arm_exti_line3(&platform)?;
    let bus = &platform.bus;
    platform.controller("exti").unwrap().on_gpio(3, true);

    assert_eq!(bus.read_u32(PLIC_CLAIM)?, 7);
    // EXTI pending never cleared, so the PLIC input is still high.
    bus.write_u32(PLIC_CLAIM, 7)?;
    assert_eq!(bus.read_u32(PLIC_PENDING)?, 1 << 7);
    Ok(())
}

#[test]
fn test_intmux_channel_feeds_vectored_controller() -> anyhow::Result<()> {
    let platform = board()?;
    let bus = &platform.bus;
    bus.write_u32(INTMUX + 0x10, 1 << 2)?; // channel 0 IER
    bus.write_u32(VIC + 0x10, 1 << 12)?; // INTENABLE
    bus.write_u32(VIC + 0x200, 0x20 | 12)?; // VECTCNTL0
    bus.write_u32(VIC + 0x100, 0x8000_1234)?; // VECTADDR0

    platform.controller("intmux").unwrap().on_gpio(2, true);
    let vic = platform.controller("vic").unwrap();
    assert!(vic.connections()[0].is_set());
    assert_eq!(bus.read_u32(VIC + 0x30)?, 0x8000_1234);
    Ok(())
}

#[test]
fn test_router_misc_window_is_mapped() -> anyhow::Result<()> {
    let platform = board()?;
    platform.bus.write_u32(ROUTER_MISC + 4, 0x81)?;
    let router = platform.controller("router").unwrap();
    assert!(router.connections()[0].is_set());
    assert!(router.connections()[7].is_set());
    assert!(platform.bus.peripheral("router.misc").is_some());
    Ok(())
}

#[test]
fn test_platform_reset_is_idempotent_and_keeps_wiring() -> anyhow::Result<()> {
    let platform = board()?;
    arm_exti_line3(&platform)?;
    let exti = platform.controller("exti").unwrap();
    exti.on_gpio(3, true);

    platform.reset();
    platform.reset();
    for id in ["exti", "plic", "vic", "intmux", "router"] {
        let ctrl = platform.controller(id).unwrap();
        assert!(
            ctrl.connections().iter().all(|l| !l.is_set()),
            "{} outputs after reset",
            id
        );
    }
    assert_eq!(platform.bus.read_u32(PLIC_PENDING)?, 0);
    assert_eq!(platform.bus.read_u32(EXTI)?, 0);

    arm_exti_line3(&platform)?;
    exti.on_gpio(3, false);
    exti.on_gpio(3, true);
    assert_eq!(platform.bus.read_u32(PLIC_PENDING)?, 1 << 7);
    Ok(())
}
