// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::thread;

use super::{HostBridge, NotificationBridge, NotifyOutcome};
use crate::controller::Shared;
use crate::test_support::{FakeRuntime, RecordingListener};

fn bridge_with(bridge: Option<HostBridge>, enabled: bool) -> NotificationBridge {
    let shared = Arc::new(Shared::default());
    {
        let mut state = shared.state.lock();
        state.bridge = bridge;
        state.enabled = enabled;
    }
    NotificationBridge::new(shared)
}

/// Run `f` on a fresh thread and wait for it, so thread-local attachment
/// state starts empty and its destructor has run on return.
fn on_fresh_thread<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> anyhow::Result<T> {
    thread::spawn(f).join().map_err(|_| anyhow::anyhow!("thread panicked"))
}

#[test]
fn delivers_timestamp_when_enabled() {
    let listener = RecordingListener::new();
    let notifier = bridge_with(Some(HostBridge::native(listener.clone())), true);
    assert_eq!(notifier.notify(1_700_000_000_123), NotifyOutcome::Delivered);
    assert_eq!(listener.timestamps(), vec![1_700_000_000_123]);
}

#[test]
fn disabled_drops_without_calling_host() {
    let listener = RecordingListener::new();
    let notifier = bridge_with(Some(HostBridge::native(listener.clone())), false);
    assert_eq!(notifier.notify(1), NotifyOutcome::Disabled);
    assert_eq!(listener.count(), 0);
}

#[test]
fn unbound_drops() {
    let notifier = bridge_with(None, true);
    assert_eq!(notifier.notify(1), NotifyOutcome::Unbound);
}

#[test]
fn callback_error_is_contained() {
    let listener = RecordingListener::new();
    listener.fail_with_error(true);
    let notifier = bridge_with(Some(HostBridge::native(listener.clone())), true);
    assert_eq!(notifier.notify(5), NotifyOutcome::CallbackFailed);
    // Still callable afterwards.
    listener.fail_with_error(false);
    assert_eq!(notifier.notify(6), NotifyOutcome::Delivered);
    assert_eq!(listener.timestamps(), vec![5, 6]);
}

#[test]
fn callback_panic_is_contained() {
    let listener = RecordingListener::new();
    listener.fail_with_panic(true);
    let notifier = bridge_with(Some(HostBridge::native(listener.clone())), true);
    assert_eq!(notifier.notify(7), NotifyOutcome::CallbackFailed);
    listener.fail_with_panic(false);
    assert_eq!(notifier.notify(8), NotifyOutcome::Delivered);
}

#[test]
fn closures_are_listeners() {
    let notifier = bridge_with(
        Some(HostBridge::native(Arc::new(|ts: i64| -> anyhow::Result<()> {
            anyhow::ensure!(ts > 0, "bad timestamp");
            Ok(())
        }))),
        true,
    );
    assert_eq!(notifier.notify(10), NotifyOutcome::Delivered);
    assert_eq!(notifier.notify(-1), NotifyOutcome::CallbackFailed);
}

#[test]
fn detached_thread_attaches_once_and_detaches_on_exit() -> anyhow::Result<()> {
    let listener = RecordingListener::new();
    let runtime = FakeRuntime::new();
    let notifier =
        bridge_with(Some(HostBridge::managed(listener.clone(), runtime.clone())), true);

    let outcomes = on_fresh_thread(move || [notifier.notify(1), notifier.notify(2)])?;
    assert_eq!(outcomes, [NotifyOutcome::Delivered, NotifyOutcome::Delivered]);
    assert_eq!(listener.count(), 2);
    assert_eq!(runtime.attaches(), 1);
    assert_eq!(runtime.detaches(), 1);
    Ok(())
}

#[test]
fn member_thread_is_never_detached() -> anyhow::Result<()> {
    let listener = RecordingListener::new();
    let runtime = FakeRuntime::new();
    let notifier =
        bridge_with(Some(HostBridge::managed(listener.clone(), runtime.clone())), true);

    let thread_runtime = runtime.clone();
    let outcome = on_fresh_thread(move || {
        thread_runtime.adopt_current_thread();
        notifier.notify(3)
    })?;
    assert_eq!(outcome, NotifyOutcome::Delivered);
    assert_eq!(runtime.attaches(), 0);
    assert_eq!(runtime.detaches(), 0);
    Ok(())
}

#[test]
fn attach_refusal_drops_notification() -> anyhow::Result<()> {
    let listener = RecordingListener::new();
    let runtime = FakeRuntime::new();
    runtime.refuse_attach(true);
    let notifier =
        bridge_with(Some(HostBridge::managed(listener.clone(), runtime.clone())), true);

    let outcome = on_fresh_thread(move || notifier.notify(4))?;
    assert_eq!(outcome, NotifyOutcome::AttachFailed);
    assert_eq!(listener.count(), 0);
    assert_eq!(runtime.detaches(), 0);
    Ok(())
}

#[test]
fn unsupported_runtime_drops_notification() -> anyhow::Result<()> {
    let listener = RecordingListener::new();
    let runtime = FakeRuntime::new();
    runtime.set_unsupported(true);
    let notifier =
        bridge_with(Some(HostBridge::managed(listener.clone(), runtime.clone())), true);

    let outcome = on_fresh_thread(move || notifier.notify(4))?;
    assert_eq!(outcome, NotifyOutcome::AttachFailed);
    assert_eq!(listener.count(), 0);
    assert_eq!(runtime.attaches(), 0);
    Ok(())
}
