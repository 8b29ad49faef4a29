// CLASSIFICATION: COMMUNITY
// Filename: launch.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

use std::sync::Arc;

use cohesix_launchpad::image::ElfBuilder;
use cohesix_launchpad::kernel::host::{HostKernel, HostOp};
use cohesix_launchpad::kernel::{ChannelMessage, MapFlags};
use cohesix_launchpad::loader_svc::SharedEndpoint;
use cohesix_launchpad::procargs::{HandleInfo, HandleType, ProcArgs};
use cohesix_launchpad::{Handle, Kernel, LaunchEnv, Launchpad, Rights, Status};

const TEXT: MapFlags = MapFlags::PERM_READ.union(MapFlags::PERM_EXECUTE);

fn program() -> Vec<u8> {
    ElfBuilder::dynamic(0x1010)
        .segment(0x1000, b"\x90\x90\xc3", 0x1000, TEXT)
        .segment(0x3000, b"data", 0x2000, MapFlags::PERM_READ | MapFlags::PERM_WRITE)
        .build()
}

fn vmo(host: &Arc<HostKernel>, bytes: &[u8]) -> Handle {
    host.handle(host.vmo_with_contents(bytes).unwrap())
}

fn bound(host: &Arc<HostKernel>, env: LaunchEnv) -> Launchpad {
    let job = host.create_job();
    let (process, vmar) = host.process_create(job, "child").unwrap();
    host.handle_close(job).unwrap();
    Launchpad::create_with_process(env, host.handle(process), host.handle(vmar))
}

fn tags(message: &ChannelMessage) -> Vec<Option<HandleType>> {
    ProcArgs::parse(&message.bytes)
        .unwrap()
        .handle_info(message.handles.len())
        .unwrap()
        .into_iter()
        .map(HandleInfo::handle_type)
        .collect()
}

#[test]
fn static_program_starts_with_small_stack() {
    let host = HostKernel::shared();
    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    lp.set_stack_size(16 * 1024);
    lp.set_args(["prog", "a", "bb"]).unwrap();
    lp.set_environ(["HOME=/", "TERM=vt100"]).unwrap();
    lp.elf_load(vmo(&host, &program())).unwrap();
    let entry = lp.entry_address().unwrap();
    assert_eq!(entry, lp.base_address().unwrap() + 0x10);

    let process = lp.start().unwrap();
    assert!(process.is_valid());
    assert_eq!(lp.handle_count(), 0);
    assert!(!lp.process_handle().is_valid());

    let record = host.process_started(process.raw()).unwrap();
    assert_eq!(record.entry, entry);
    assert_eq!(record.arg2, 0);
    assert_eq!(record.stack % 8, 0);
    let stack = host
        .mappings(process.raw())
        .into_iter()
        .find(|m| m.len == 16 * 1024 && m.flags == MapFlags::PERM_READ | MapFlags::PERM_WRITE)
        .unwrap();
    assert!(record.stack > stack.addr && record.stack <= stack.addr + stack.len);

    let messages = host.take_bootstrap(process.raw()).unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(
        tags(message),
        vec![
            Some(HandleType::ProcessSelf),
            Some(HandleType::RootVmar),
            Some(HandleType::StackVmo),
            Some(HandleType::ThreadSelf),
        ]
    );
    let parsed = ProcArgs::parse(&message.bytes).unwrap();
    assert_eq!(parsed.args().unwrap(), vec![&b"prog"[..], &b"a"[..], &b"bb"[..]]);
    assert_eq!(parsed.environ().unwrap(), vec![&b"HOME=/"[..], &b"TERM=vt100"[..]]);
    assert_eq!(host.read_mapped(process.raw(), entry - 0x10, 3).unwrap(), b"\x90\x90\xc3");

    drop(lp);
    drop(process);
    assert_eq!(host.live_handles(), 0);
    assert_eq!(host.bad_closes(), 0);
}

/// Header 28 + four tags 16 leaves 2004 bytes of argument text for 2048.
fn message_of(total: usize) -> (Arc<HostKernel>, Result<Handle, Status>, Launchpad) {
    let host = HostKernel::shared();
    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    lp.set_stack_size(4096);
    lp.set_args(["x".repeat(total - 44 - 1)]).unwrap();
    lp.elf_load(vmo(&host, &program())).unwrap();
    let result = lp.start();
    (host, result, lp)
}

#[test]
fn message_may_fill_half_the_stack() {
    let (host, result, _lp) = message_of(2048);
    let process = result.unwrap();
    let messages = host.take_bootstrap(process.raw()).unwrap();
    assert_eq!(messages[0].bytes.len(), 2048);
}

#[test]
fn message_over_half_the_stack_is_refused() {
    let (host, result, lp) = message_of(2049);
    assert_eq!(result.err(), Some(Status::BufferTooSmall));
    assert_eq!(lp.error_message(), "procargs message is too large");
    drop(lp);
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn interpreter_is_loaded_in_place_of_program() {
    let host = HostKernel::shared();
    let linker = ElfBuilder::dynamic(0x2040)
        .segment(0x2000, b"LD", 0x1000, TEXT)
        .build();
    let service = host.spawn_loader_service(move |name| (name == "ld.so.1").then(|| linker.clone()));
    let env = LaunchEnv::new(host.clone())
        .with_loader_service(SharedEndpoint::new(host.handle(service)));
    let mut lp = bound(&host, env);
    lp.set_args(["prog"]).unwrap();

    let main = ElfBuilder::dynamic(0x1000)
        .segment(0x1000, b"\xc3", 0x1000, TEXT)
        .interp("ld.so.1")
        .build();
    let image = vmo(&host, &main);
    let image_koid = host.koid(image.raw());
    lp.elf_load(image).unwrap();

    assert!(lp.send_loader_message(true));
    assert_eq!(host.koid(lp.exec_vmo().unwrap().raw()), image_koid);
    assert!(lp.loader_service().is_some());
    let base = lp.base_address().unwrap();
    assert_eq!(lp.entry_address().unwrap(), base + 0x40);
    assert_eq!(host.read_mapped(lp.process_handle().raw(), base, 2).unwrap(), b"LD");

    let process = lp.start().unwrap();
    assert!(lp.exec_vmo().is_none());
    assert!(lp.loader_service().is_none());
    let messages = host.take_bootstrap(process.raw()).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        tags(&messages[0]),
        vec![
            Some(HandleType::LoaderService),
            Some(HandleType::ExecutableVmo),
            Some(HandleType::ProcessSelf),
            Some(HandleType::RootVmar),
            Some(HandleType::ThreadSelf),
        ]
    );
    let loader = ProcArgs::parse(&messages[0].bytes).unwrap();
    assert_eq!(loader.header().args_off, 48);
    assert_eq!(loader.args().unwrap(), vec![&b"prog"[..]]);
    assert_eq!(tags(&messages[1])[0], Some(HandleType::ProcessSelf));
}

#[test]
fn missing_interpreter_fails_load() {
    let host = HostKernel::shared();
    let service = host.spawn_loader_service(|_| None);
    let env = LaunchEnv::new(host.clone())
        .with_loader_service(SharedEndpoint::new(host.handle(service)));
    let mut lp = bound(&host, env);
    let main = ElfBuilder::dynamic(0x1000)
        .segment(0x1000, b"\xc3", 0x1000, TEXT)
        .interp("ld.so.1")
        .build();
    assert_eq!(lp.elf_load(vmo(&host, &main)), Err(Status::NotFound));
    assert_eq!(lp.error_message(), "elf_load: handle_interp failed");
    assert!(lp.exec_vmo().is_none());
}

#[test]
fn interpreter_without_loader_service_is_not_supported() {
    let host = HostKernel::shared();
    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    let main = ElfBuilder::dynamic(0x1000)
        .segment(0x1000, b"\xc3", 0x1000, TEXT)
        .interp("ld.so.1")
        .build();
    assert_eq!(lp.elf_load(vmo(&host, &main)), Err(Status::NotSupported));
}

#[test]
fn basic_load_ignores_interpreter() {
    let host = HostKernel::shared();
    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    let main = ElfBuilder::dynamic(0x1000)
        .segment(0x1000, b"\xc3", 0x1000, TEXT)
        .interp("ld.so.1")
        .build();
    lp.elf_load_basic(vmo(&host, &main)).unwrap();
    assert!(!lp.send_loader_message(false));
    assert!(lp.exec_vmo().is_none());
    assert_eq!(lp.elf_load_basic(Handle::invalid()), Err(Status::InvalidArgs));
    assert_eq!(lp.error_message(), "elf_load: invalid vmo");
}

#[test]
fn every_failed_step_releases_its_resources() {
    let steps = [
        (HostOp::Duplicate, 0, "start: cannot duplicate process handle"),
        (HostOp::ChannelCreate, 0, "start: cannot create channel"),
        (HostOp::VmoCreate, 0, "cannot create stack vmo"),
        (HostOp::VmarMap, 0, "cannot map stack vmo"),
        (HostOp::ThreadCreate, 0, "cannot create initial thread"),
        (HostOp::Duplicate, 1, "cannot duplicate thread handle"),
        (HostOp::ChannelWrite, 0, "failed to write procargs message"),
        (HostOp::ProcessStart, 0, "start: process_start() failed"),
    ];
    for (op, skip, context) in steps {
        let host = HostKernel::shared();
        let mut lp = bound(&host, LaunchEnv::new(host.clone()));
        lp.set_args(["prog"]).unwrap();
        lp.add_handle(vmo(&host, b"extra"), HandleInfo::new(HandleType::User0, 7))
            .unwrap();
        lp.elf_load(vmo(&host, &program())).unwrap();
        let watch = lp.process_handle().duplicate(Rights::SAME_RIGHTS).unwrap();

        host.fail_at(op, skip, Status::NoResources);
        assert_eq!(lp.start().err(), Some(Status::NoResources), "{op:?}");
        assert_eq!(lp.error_message(), context, "{op:?}");
        assert!(host.process_started(watch.raw()).is_none(), "{op:?}");
        assert_eq!(lp.start().err(), Some(Status::NoResources), "{op:?}");

        drop(lp);
        drop(watch);
        assert_eq!(host.live_handles(), 0, "{op:?}");
        assert_eq!(host.bad_closes(), 0, "{op:?}");
    }
}

#[test]
fn failed_loader_message_keeps_special_handles() {
    let host = HostKernel::shared();
    let linker = ElfBuilder::dynamic(0x2000)
        .segment(0x2000, b"LD", 0x1000, TEXT)
        .build();
    let service = host.spawn_loader_service(move |_| Some(linker.clone()));
    let env = LaunchEnv::new(host.clone())
        .with_loader_service(SharedEndpoint::new(host.handle(service)));
    let mut lp = bound(&host, env);
    let main = ElfBuilder::dynamic(0x1000)
        .segment(0x1000, b"\xc3", 0x1000, TEXT)
        .interp("ld.so.1")
        .build();
    lp.elf_load(vmo(&host, &main)).unwrap();

    host.fail_next(HostOp::ChannelWrite, Status::PeerClosed);
    assert_eq!(lp.start().err(), Some(Status::PeerClosed));
    assert_eq!(lp.error_message(), "failed to send loader message");
    assert!(lp.exec_vmo().is_some());
    assert!(lp.loader_service().is_some());
    drop(lp);
    assert_eq!(host.bad_closes(), 0);
}

#[test]
fn injected_thread_joins_running_process() {
    let host = HostKernel::shared();
    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    lp.set_stack_size(0);
    lp.elf_load(vmo(&host, &program())).unwrap();
    let entry = lp.entry_address().unwrap();

    let (ours, theirs) = host.channel_create().unwrap();
    let ours = host.handle(ours);
    let theirs = host.handle(theirs);
    lp.start_injected("worker", &ours, 0x1234).unwrap();

    let message = host.channel_read(theirs.raw()).unwrap();
    assert_eq!(
        tags(&message),
        vec![
            Some(HandleType::ProcessSelf),
            Some(HandleType::RootVmar),
            Some(HandleType::ThreadSelf),
        ]
    );
    let received: Vec<Handle> = message.handles.iter().map(|raw| host.handle(*raw)).collect();
    let started = host.thread_started(received[2].raw()).unwrap();
    assert_eq!(started.entry, entry);
    assert_eq!(started.stack, 0);
    assert_eq!(started.arg1, 0x1234);
    assert_eq!(
        host.thread_name(host.koid(received[2].raw()).unwrap()).as_deref(),
        Some("worker")
    );
}

#[test]
fn go_reports_the_first_failure_and_consumes_context() {
    let host = HostKernel::shared();
    let lp = bound(&host, LaunchEnv::new(host.clone()));
    let failure = lp.go().unwrap_err();
    assert_eq!(failure.status, Status::BadState);
    assert_eq!(failure.context, "start: prepare_start() failed");
    assert!(failure.to_string().starts_with("start: prepare_start() failed: "));
    assert_eq!(host.live_handles(), 0);

    let mut lp = bound(&host, LaunchEnv::new(host.clone()));
    lp.elf_load(vmo(&host, &program())).unwrap();
    let process = lp.go().unwrap();
    assert!(host.process_started(process.raw()).is_some());
    drop(process);
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn created_process_carries_its_job() {
    let host = HostKernel::shared();
    let job = host.handle(host.create_job());
    let mut lp = Launchpad::create(LaunchEnv::new(host.clone()), &job, "named");
    assert_eq!(host.process_name(lp.process_handle().raw()).as_deref(), Some("named"));
    assert_eq!(lp.handle_count(), 3);
    lp.elf_load(vmo(&host, &program())).unwrap();
    let process = lp.start().unwrap();
    let messages = host.take_bootstrap(process.raw()).unwrap();
    assert_eq!(tags(&messages[0])[2], Some(HandleType::Job));
}

#[test]
fn failed_process_creation_yields_failed_context() {
    let host = HostKernel::shared();
    let job = host.handle(host.create_job());
    host.fail_next(HostOp::ProcessCreate, Status::AccessDenied);
    let mut lp = Launchpad::create(LaunchEnv::new(host.clone()), &job, "denied");
    assert_eq!(lp.status(), Err(Status::AccessDenied));
    assert_eq!(lp.error_message(), "create: process_create() failed");
    assert_eq!(lp.set_args(["x"]), Err(Status::AccessDenied));
    drop(lp);
    assert_eq!(host.live_handles(), 1);
}
