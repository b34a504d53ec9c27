//! CONTEXT: Integration tests for gpiomem sessions and mmap gating
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 10 integration tests + 1 property test
//!
//! TEST_SCOPE:
//!   - Minor-identity gating on open/release
//!   - Window containment through the session entry point
//!   - Installed protection and fault-path capabilities
//!   - Retry after a refused remap
//!   - Concurrent sessions on a shared device
//!   - Configuration loaded from disk
//!
//! TEST_SCENARIOS:
//!   - test_only_configured_minor_opens(): ENXIO for foreign minors
//!   - test_enclosing_request_is_mapped(): default containment accept case
//!   - test_request_inside_window_is_denied(): default containment deny case, no remap call
//!   - test_strict_containment_from_config(): request-within-region policy
//!   - test_strict_containment_cannot_reach_sub_page_window(): page-granular limit
//!   - test_uncached_protection_is_installed(): protection hook reaches page flags
//!   - test_custom_protection_cannot_escape_user_noexec(): replaced hook is clamped
//!   - test_refused_remap_can_be_retried(): TransientMap then success
//!   - test_concurrent_sessions(): shared device across threads
//!   - test_config_file_round_trip(): TOML file drives attach
//!   - denial_never_calls_memory_manager(): property over arbitrary VMAs
//!
//! DEPENDENCIES:
//!   - gpiomem::host::{HostAddressSpace, HostRegistrar}

use std::io::Write;

use gpiomem::host::{HostAddressSpace, HostRegistrar};
use gpiomem::{
    ContainmentPolicy, Errno, Error, GpioMem, GpioMemConfig, MapError, PageFlags, PlatformDevice,
    ProtectionPolicy, StaticResources, VmArea, OF_COMPATIBLE, PAGE_SIZE,
};
use proptest::prelude::*;

const USER_BASE: u64 = 0x10_0000;

fn node() -> PlatformDevice<StaticResources> {
    PlatformDevice::new([OF_COMPATIBLE], StaticResources::from_windows(&[(0x1000, 0x2000)]))
}

fn attach(config: GpioMemConfig, registrar: &HostRegistrar) -> GpioMem<&HostRegistrar> {
    GpioMem::attach(config, &node(), registrar).expect("attach")
}

#[test]
fn only_configured_minor_opens() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar);
    let err = dev.open(1).unwrap_err();
    assert!(matches!(err, Error::NoSuchDevice { minor: 1 }));
    assert_eq!(err.errno(), Errno::ENXIO);
    assert_eq!(dev.release(1).unwrap_err().errno(), Errno::ENXIO);

    let session = dev.open(0).expect("open");
    session.close().expect("close");
    dev.release(0).expect("release");

    let config = GpioMemConfig { minor: 3, ..GpioMemConfig::default() };
    let other = GpioMem::attach(config, &node(), &registrar).expect("attach minor 3");
    assert!(other.open(0).is_err());
    assert_eq!(other.open(3).expect("open minor 3").minor(), 3);
}

#[test]
fn enclosing_request_is_mapped() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();

    let plan = session.mmap(&VmArea::new(USER_BASE, 0x3000, 0).unwrap(), &mut space).expect("mmap");
    assert_eq!(plan.region_index, 0);
    assert_eq!(space.remap_calls(), 1);
    assert_eq!(space.mapped_pages(), 3);

    let (pa, flags) = space.translate(USER_BASE + 0x1010).expect("page mapped");
    assert_eq!(pa, 0x1010);
    assert!(flags.contains(PageFlags::USER | PageFlags::READ | PageFlags::WRITE));
    assert!(!flags.contains(PageFlags::EXECUTE));
    assert!(space.records()[0].ops.access_phys);
}

#[test]
fn request_inside_window_is_denied() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();

    let err = session.mmap(&VmArea::new(USER_BASE, 0x800, 1).unwrap(), &mut space).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { start: 0x1000, end: 0x1800 }));
    assert_eq!(err.errno(), Errno::EACCES);
    assert_eq!(space.remap_calls(), 0);
    assert_eq!(space.mapped_pages(), 0);
}

#[test]
fn strict_containment_from_config() {
    let registrar = HostRegistrar::new();
    let config = GpioMemConfig::from_toml_str("containment = \"request-within-region\"").unwrap();
    assert_eq!(config.containment, ContainmentPolicy::RequestWithinRegion);
    let dev = attach(config, &registrar);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();

    session.mmap(&VmArea::new(USER_BASE, 0x800, 1).unwrap(), &mut space).expect("inside window");
    let err = session.mmap(&VmArea::new(USER_BASE + 0x10_0000, 0x3000, 0).unwrap(), &mut space).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));
    assert_eq!(space.remap_calls(), 1);
}

#[test]
fn strict_containment_cannot_reach_sub_page_window() {
    let registrar = HostRegistrar::new();
    let platform =
        PlatformDevice::new([OF_COMPATIBLE], StaticResources::from_windows(&[(0x01c2_0800, 0x01c2_0bff)]));
    let vma = VmArea::new(USER_BASE, PAGE_SIZE, 0x1c20).unwrap();

    let dev = GpioMem::attach(GpioMemConfig::default(), &platform, &registrar).expect("attach");
    let mut space = HostAddressSpace::new();
    let plan = dev.open(0).unwrap().mmap(&vma, &mut space).expect("page enclosing the window");
    assert_eq!(plan.length, PAGE_SIZE);
    dev.detach();

    let config = GpioMemConfig { containment: ContainmentPolicy::RequestWithinRegion, ..GpioMemConfig::default() };
    let dev = GpioMem::attach(config, &platform, &registrar).expect("attach");
    let mut space = HostAddressSpace::new();
    let err = dev.open(0).unwrap().mmap(&vma, &mut space).unwrap_err();
    assert!(matches!(err, Error::AccessDenied { start: 0x01c2_0000, end: 0x01c2_1000 }));
    assert_eq!(space.remap_calls(), 0);
}

#[test]
fn uncached_protection_is_installed() {
    let registrar = HostRegistrar::new();
    let config = GpioMemConfig::from_toml_str("protection = \"uncached\"\nbyte_access = false").unwrap();
    let dev = attach(config, &registrar);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();

    let plan = session.mmap(&VmArea::new(USER_BASE, 0x3000, 0).unwrap(), &mut space).unwrap();
    assert!(plan.protection.contains(PageFlags::UNCACHED));
    let (_, flags) = space.translate(USER_BASE).unwrap();
    assert!(flags.contains(PageFlags::UNCACHED));
    assert!(!space.records()[0].ops.access_phys);
}

struct ReadOnlyExec;

impl ProtectionPolicy for ReadOnlyExec {
    fn phys_mem_access_prot(&self, _minor: u32, _pgoff: u64, _len: u64, _requested: PageFlags) -> PageFlags {
        PageFlags::READ | PageFlags::EXECUTE
    }
}

#[test]
fn custom_protection_cannot_escape_user_noexec() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar).with_protection_policy(ReadOnlyExec);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();

    let plan = session.mmap(&VmArea::new(USER_BASE, 0x3000, 0).unwrap(), &mut space).unwrap();
    assert_eq!(plan.protection, PageFlags::VALID | PageFlags::USER | PageFlags::READ);
}

#[test]
fn refused_remap_can_be_retried() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar);
    let session = dev.open(0).unwrap();
    let mut space = HostAddressSpace::new();
    let vma = VmArea::new(USER_BASE, 0x3000, 0).unwrap();

    space.deny_next_remap();
    let err = session.mmap(&vma, &mut space).unwrap_err();
    assert!(matches!(err, Error::TransientMap(MapError::PermissionDenied)));
    assert!(err.is_retryable());
    assert_eq!(err.errno(), Errno::EAGAIN);
    assert_eq!(space.mapped_pages(), 0);

    session.mmap(&vma, &mut space).expect("retry");
    assert_eq!(space.remap_calls(), 2);
    assert_eq!(space.mapped_pages(), 3);
}

#[test]
fn concurrent_sessions() {
    let registrar = HostRegistrar::new();
    let dev = attach(GpioMemConfig::default(), &registrar);
    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let dev = &dev;
            scope.spawn(move || {
                let session = dev.open(0).expect("open");
                let mut space = HostAddressSpace::new();
                let base = USER_BASE + worker * 0x10_0000;
                session.mmap(&VmArea::new(base, 0x3000, 0).unwrap(), &mut space).expect("mmap");
                assert!(session.mmap(&VmArea::new(base + 0x8000, 0x800, 1).unwrap(), &mut space).is_err());
                assert_eq!(space.remap_calls(), 1);
                session.close().expect("close");
            });
        }
    });
    dev.detach();
    assert!(registrar.is_clean());
}

#[test]
fn config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "node_name = \"gpiomem0\"\ncontainment = \"request-within-region\"\nmax_regions = 4").unwrap();
    let config = GpioMemConfig::load(file.path()).expect("load");

    let registrar = HostRegistrar::new();
    let dev = attach(config, &registrar);
    assert_eq!(dev.config().node_name, "gpiomem0");
    assert_eq!(dev.config().max_regions, 4);
    let session = dev.open(0).unwrap();
    assert!(session.validate(&VmArea::new(USER_BASE, 0x1000, 1).unwrap()).is_ok());
}

proptest! {
    #[test]
    fn denial_never_calls_memory_manager(pgoff in 0u64..0x10, pages in 1u64..0x10) {
        let registrar = HostRegistrar::new();
        let dev = attach(GpioMemConfig::default(), &registrar);
        let session = dev.open(0).unwrap();
        let mut space = HostAddressSpace::new();
        let vma = VmArea::new(USER_BASE, pages * PAGE_SIZE, pgoff).unwrap();
        match session.mmap(&vma, &mut space) {
            Ok(_) => prop_assert_eq!(space.remap_calls(), 1),
            Err(err) => {
                prop_assert!(matches!(err, Error::AccessDenied { .. }), "expected AccessDenied, got {}", err);
                prop_assert_eq!(err.errno(), Errno::EACCES);
                prop_assert_eq!(space.remap_calls(), 0);
            }
        }
    }
}
