// CLASSIFICATION: COMMUNITY
// Filename: runtime_image.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

use std::sync::Arc;

use cohesix_launchpad::image::ElfBuilder;
use cohesix_launchpad::kernel::host::HostKernel;
use cohesix_launchpad::kernel::MapFlags;
use cohesix_launchpad::procargs::{HandleType, ProcArgs};
use cohesix_launchpad::runtime_image::{self, StartupHandleTable, RUNTIME_IMAGE_INFO};
use cohesix_launchpad::{Handle, Kernel, LaunchEnv, Launchpad, Status};
use serial_test::serial;

fn elf(vaddr: u64, body: &[u8]) -> Vec<u8> {
    ElfBuilder::dynamic(vaddr)
        .segment(vaddr, body, 0x1000, MapFlags::PERM_READ | MapFlags::PERM_EXECUTE)
        .build()
}

fn vmo(host: &Arc<HostKernel>, bytes: &[u8]) -> Handle {
    host.handle(host.vmo_with_contents(bytes).unwrap())
}

fn context(host: &Arc<HostKernel>) -> Launchpad {
    let job = host.create_job();
    let (process, vmar) = host.process_create(job, "child").unwrap();
    host.handle_close(job).unwrap();
    Launchpad::create_with_process(
        LaunchEnv::new(host.clone()),
        host.handle(process),
        host.handle(vmar),
    )
}

#[test]
#[serial]
fn default_runtime_is_loaded_and_handed_over() {
    runtime_image::reset();
    let host = HostKernel::shared();
    let startup = StartupHandleTable::new();
    startup.insert(RUNTIME_IMAGE_INFO, vmo(&host, &elf(0x5000, b"RT")));
    runtime_image::global().register_source(startup);

    let mut lp = context(&host);
    lp.load_from_image(vmo(&host, &elf(0x1000, b"\xc3"))).unwrap();
    let runtime_base = lp.runtime_base();
    assert_ne!(runtime_base, 0);
    assert_ne!(runtime_base, lp.base_address().unwrap());
    assert_eq!(
        host.read_mapped(lp.process_handle().raw(), runtime_base, 2).unwrap(),
        b"RT"
    );

    let process = lp.start().unwrap();
    let record = host.process_started(process.raw()).unwrap();
    assert_eq!(record.arg2, runtime_base);
    let message = host.take_bootstrap(process.raw()).unwrap().remove(0);
    let info = ProcArgs::parse(&message.bytes)
        .unwrap()
        .handle_info(message.handles.len())
        .unwrap();
    assert_eq!(info[2].handle_type(), Some(HandleType::RuntimeImage));

    assert!(runtime_image::global().is_resolved());
    runtime_image::reset();
    assert!(runtime_image::get().is_err());
}

#[test]
#[serial]
fn explicit_runtime_leaves_cache_alone() {
    runtime_image::reset();
    let host = HostKernel::shared();
    let mut lp = context(&host);
    let runtime = vmo(&host, &elf(0x5000, b"RT"));
    lp.load_runtime(Some(&runtime)).unwrap();
    assert_ne!(lp.runtime_base(), 0);
    assert!(runtime.is_valid());
    assert!(!runtime_image::global().is_resolved());
}

#[test]
#[serial]
fn missing_runtime_fails_the_context() {
    runtime_image::reset();
    let host = HostKernel::shared();
    let mut lp = context(&host);
    lp.elf_load(vmo(&host, &elf(0x1000, b"\xc3"))).unwrap();
    assert_eq!(lp.load_runtime(None), Err(Status::InvalidArgs));
    assert_eq!(lp.error_message(), "elf_load_extra: invalid vmo");
    assert_eq!(lp.add_runtime_image(), Err(Status::InvalidArgs));
    assert_eq!(lp.runtime_base(), 0);
}

#[test]
#[serial]
fn set_replaces_the_default() {
    runtime_image::reset();
    let host = HostKernel::shared();
    let first = vmo(&host, b"one");
    let first_koid = host.koid(first.raw());
    assert!(runtime_image::set(Some(first)).is_none());
    let copy = runtime_image::get().unwrap();
    assert_eq!(host.koid(copy.raw()), first_koid);

    let previous = runtime_image::set(Some(vmo(&host, b"two"))).unwrap();
    assert_eq!(host.koid(previous.raw()), first_koid);
    drop(previous);
    drop(copy);
    runtime_image::reset();
    assert_eq!(host.live_handles(), 0);
}
