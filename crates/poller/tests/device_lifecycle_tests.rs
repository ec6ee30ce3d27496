//! Device lifecycle integration tests
//!
//! Drives `UsbDevice` against the simulated bus:
//! - Lookup by vendor/product id
//! - Kernel driver detach, claim, release and reattach ordering
//! - Release on every exit path (errors and panics)
//! - Endpoint resolution by direction
//!
//! Run with: `cargo test -p poller --test device_lifecycle_tests`

use common::{DeviceSelector, Direction, EndpointInfo, TransferKind};
use poller::test_utils::{BusCall, SimulatedBus, SimulatedDevice};
use poller::usb::{ClaimError, ClaimOptions, OpenError, UsbDevice};
use std::panic::{AssertUnwindSafe, catch_unwind};

const SELECTOR: DeviceSelector = DeviceSelector::new(0x0483, 0x5711);

fn bus_with(device: SimulatedDevice) -> SimulatedBus {
    SimulatedBus::new().with_device(device)
}

fn is_release(call: &BusCall) -> bool {
    matches!(call, BusCall::ReleaseInterface(0))
}

fn fail_mid_block() {
    panic!("caller panicked mid-block");
}

// ============================================================================
// Lookup
// ============================================================================

#[test]
fn test_open_missing_device() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR));

    for (vid, pid) in [(0x0483, 0x5712), (0x0484, 0x5711), (0x1234, 0x5678), (0, 0)] {
        match UsbDevice::open(&bus, DeviceSelector::new(vid, pid)) {
            Err(OpenError::DeviceNotFound {
                vendor_id,
                product_id,
            }) => {
                assert_eq!(vendor_id, vid);
                assert_eq!(product_id, pid);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("{:04x}:{:04x} should not be found", vid, pid),
        }
    }

    assert!(bus.calls().is_empty());
}

#[test]
fn test_open_on_empty_bus() {
    let bus = SimulatedBus::new();
    assert!(matches!(
        UsbDevice::open(&bus, SELECTOR),
        Err(OpenError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_open_picks_first_match() {
    let bus = SimulatedBus::new()
        .with_device(SimulatedDevice::new(DeviceSelector::new(0x1d6b, 0x0002)).at(1, 1))
        .with_device(SimulatedDevice::new(SELECTOR).at(3, 7))
        .with_device(SimulatedDevice::new(SELECTOR).at(3, 9));

    let device = UsbDevice::open(&bus, SELECTOR).unwrap();
    assert_eq!(device.summary().bus_number, 3);
    assert_eq!(device.summary().address, 7);
    assert_eq!(device.to_string(), "0483:5711 (bus 003 address 007)");
}

// ============================================================================
// Claim / release
// ============================================================================

#[test]
fn test_claim_without_kernel_driver() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_bulk_pair(0x81, 0x01, 64));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let claimed = device.claim(ClaimOptions::default()).unwrap();
    assert!(!claimed.detached_kernel_driver());
    claimed.release().unwrap();

    assert_eq!(
        bus.calls(),
        vec![
            BusCall::KernelDriverActive(0),
            BusCall::ClaimInterface(0),
            BusCall::ReleaseInterface(0),
        ]
    );
}

#[test]
fn test_claim_detaches_bound_driver_once() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_kernel_driver());
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let claimed = device.claim(ClaimOptions::default()).unwrap();
    assert!(claimed.detached_kernel_driver());

    assert_eq!(
        bus.calls(),
        vec![
            BusCall::KernelDriverActive(0),
            BusCall::DetachKernelDriver(0),
            BusCall::ClaimInterface(0),
        ]
    );

    drop(claimed);

    assert_eq!(
        bus.calls()[3..],
        [BusCall::ReleaseInterface(0), BusCall::AttachKernelDriver(0)]
    );
}

#[test]
fn test_release_without_reattach() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_kernel_driver());
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let options = ClaimOptions {
        reattach_kernel_driver: false,
        ..ClaimOptions::default()
    };
    device.claim(options).unwrap().release().unwrap();

    assert_eq!(bus.count(|c| matches!(c, BusCall::AttachKernelDriver(_))), 0);
    assert_eq!(bus.count(is_release), 1);
}

#[test]
fn test_claim_on_platform_without_driver_support() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).without_kernel_driver_support());
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let claimed = device.claim(ClaimOptions::default()).unwrap();
    assert!(!claimed.detached_kernel_driver());
    drop(claimed);

    assert_eq!(bus.count(|c| matches!(c, BusCall::DetachKernelDriver(_))), 0);
    assert_eq!(bus.count(is_release), 1);
}

#[test]
fn test_claim_failure_restores_driver() {
    let bus = bus_with(
        SimulatedDevice::new(SELECTOR)
            .with_kernel_driver()
            .with_claim_error(rusb::Error::Access),
    );
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    match device.claim(ClaimOptions::default()) {
        Err(ClaimError::Claim { interface, source }) => {
            assert_eq!(interface, 0);
            assert_eq!(source, rusb::Error::Access);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("claim should fail"),
    }

    assert_eq!(
        bus.calls(),
        vec![
            BusCall::KernelDriverActive(0),
            BusCall::DetachKernelDriver(0),
            BusCall::ClaimInterface(0),
            BusCall::AttachKernelDriver(0),
        ]
    );
    assert_eq!(bus.count(is_release), 0);
}

#[test]
fn test_claim_missing_interface() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let options = ClaimOptions {
        interface: 3,
        ..ClaimOptions::default()
    };
    assert!(matches!(
        device.claim(options),
        Err(ClaimError::Claim { interface: 3, .. })
    ));
}

#[test]
fn test_release_error_reported() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_release_error(rusb::Error::NoDevice));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let claimed = device.claim(ClaimOptions::default()).unwrap();
    assert!(matches!(
        claimed.release(),
        Err(ClaimError::Release {
            interface: 0,
            source: rusb::Error::NoDevice
        })
    ));

    // The guard already released; dropping it must not release again
    assert_eq!(bus.count(is_release), 1);
}

#[test]
fn test_release_once_when_block_fails() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_bulk_pair(0x81, 0x01, 64));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let result: Result<(), String> = (|| {
        let claimed = device
            .claim(ClaimOptions::default())
            .map_err(|e| e.to_string())?;
        let _endpoint = claimed.endpoint(Direction::In).map_err(|e| e.to_string())?;
        Err("caller failed mid-block".to_string())
    })();

    assert_eq!(result.unwrap_err(), "caller failed mid-block");
    assert_eq!(bus.count(is_release), 1);
}

#[test]
fn test_release_once_when_block_panics() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_kernel_driver());
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _claimed = device.claim(ClaimOptions::default()).unwrap();
        fail_mid_block();
    }));

    assert!(result.is_err());
    assert_eq!(bus.count(is_release), 1);
    assert_eq!(bus.count(|c| matches!(c, BusCall::AttachKernelDriver(0))), 1);
}

#[test]
fn test_reclaim_after_release() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    device.claim(ClaimOptions::default()).unwrap().release().unwrap();
    device.claim(ClaimOptions::default()).unwrap().release().unwrap();

    assert_eq!(bus.count(|c| matches!(c, BusCall::ClaimInterface(0))), 2);
    assert_eq!(bus.count(is_release), 2);
}

// ============================================================================
// Endpoint resolution
// ============================================================================

#[test]
fn test_endpoints_by_direction() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_bulk_pair(0x81, 0x02, 512));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();
    let claimed = device.claim(ClaimOptions::default()).unwrap();

    let ep_in = claimed.endpoint(Direction::In).unwrap().unwrap();
    let ep_out = claimed.endpoint(Direction::Out).unwrap().unwrap();

    assert_ne!(ep_in.address(), ep_out.address());
    assert_eq!(ep_in.direction(), Direction::In);
    assert_eq!(ep_out.direction(), Direction::Out);
    assert_eq!(ep_in.address(), 0x81);
    assert_eq!(ep_out.address(), 0x02);
    assert_eq!(ep_in.max_packet_size(), 512);
}

#[test]
fn test_endpoint_first_in_descriptor_order() {
    let interrupt_in = EndpointInfo {
        address: 0x83,
        max_packet_size: 8,
        kind: TransferKind::Interrupt,
    };
    let bus = bus_with(
        SimulatedDevice::new(SELECTOR)
            .with_endpoint(interrupt_in)
            .with_bulk_pair(0x81, 0x01, 64),
    );
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();
    let claimed = device.claim(ClaimOptions::default()).unwrap();

    let ep_in = claimed.endpoint(Direction::In).unwrap().unwrap();
    assert_eq!(ep_in.info(), &interrupt_in);
}

#[test]
fn test_endpoint_absent() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_endpoint(EndpointInfo {
        address: 0x81,
        max_packet_size: 64,
        kind: TransferKind::Bulk,
    }));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();
    let claimed = device.claim(ClaimOptions::default()).unwrap();

    assert!(claimed.endpoint(Direction::Out).unwrap().is_none());
}

#[test]
fn test_endpoint_unknown_alt_setting() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_bulk_pair(0x81, 0x01, 64));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();
    let options = ClaimOptions {
        alt_setting: 1,
        ..ClaimOptions::default()
    };
    let claimed = device.claim(options).unwrap();

    let err = claimed.endpoint(Direction::In).unwrap_err();
    assert_eq!(err.alt_setting, 1);
    assert_eq!(err.source, rusb::Error::NotFound);
}

// ============================================================================
// Transfer preconditions
// ============================================================================

#[test]
fn test_read_from_out_endpoint_issues_no_transfer() {
    let bus = bus_with(SimulatedDevice::new(SELECTOR).with_bulk_pair(0x81, 0x01, 64));
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let claimed = device.claim(ClaimOptions::default()).unwrap();
        let ep_out = claimed.endpoint(Direction::Out).unwrap().unwrap();
        let _ = claimed.read(&ep_out);
    }));

    assert!(result.is_err());
    assert_eq!(bus.count(|c| matches!(c, BusCall::Read { .. })), 0);
    assert_eq!(bus.count(is_release), 1);
}

#[test]
fn test_read_and_write_through_claim() {
    let bus = bus_with(
        SimulatedDevice::new(SELECTOR)
            .with_bulk_pair(0x81, 0x01, 16)
            .with_read(Ok(vec![0xde, 0xad]))
            .with_write(Ok(Some(4))),
    );
    let mut device = UsbDevice::open(&bus, SELECTOR).unwrap();
    let claimed = device.claim(ClaimOptions::default()).unwrap();
    let ep_in = claimed.endpoint(Direction::In).unwrap().unwrap();
    let ep_out = claimed.endpoint(Direction::Out).unwrap().unwrap();

    assert_eq!(claimed.read(&ep_in).unwrap(), vec![0xde, 0xad]);
    assert_eq!(claimed.write(&ep_out, &[1, 2, 3, 4, 5, 6]).unwrap(), 4);
    assert!(bus.calls().contains(&BusCall::Read {
        endpoint: 0x81,
        len: 16
    }));
}
