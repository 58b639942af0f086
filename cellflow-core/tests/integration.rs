//! Integration Tests for the Reactive Runtime
//!
//! These tests drive atoms, computed atoms, snapshots and families together
//! through the public API only.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use cellflow_core::reactive::{wait, watch, Atom, Family, Update};
use cellflow_core::util::{delay_error, delay_value};
use cellflow_core::Error;
use tokio::task::LocalSet;

/// Setting a structurally equal value notifies nobody.
#[test]
fn identity_update_fires_no_listeners() {
    let list = Atom::new(vec![1, 2, 3]);
    let fired = Rc::new(Cell::new(0));

    let counter = Rc::clone(&fired);
    let _sub = list.on_change(move |_| counter.set(counter.get() + 1));

    list.set(vec![1, 2, 3]);
    assert_eq!(fired.get(), 0);

    list.set(vec![1, 2, 3, 4]);
    assert_eq!(fired.get(), 1);
}

/// A computed atom chain follows its source.
#[test]
fn computed_chain_propagates() {
    let base = Atom::new(2);

    let input = base.clone();
    let squared = Atom::computed(move |_| Ok(Update::Value(input.state() * input.state())));
    let input = squared.clone();
    let label = Atom::computed(move |_| Ok(Update::Value(format!("{}!", input.state()))));

    assert_eq!(label.peek(), "4!");
    base.set(3);
    assert_eq!(squared.peek(), 9);
    assert_eq!(label.peek(), "9!");
}

/// Dependencies that are no longer read are released.
#[test]
fn unread_dependencies_are_pruned() {
    let use_a = Atom::new(true);
    let a = Atom::new(1);
    let b = Atom::new(10);
    let runs = Rc::new(Cell::new(0));

    let (flag, left, right, counter) = (use_a.clone(), a.clone(), b.clone(), Rc::clone(&runs));
    let picked = Atom::computed(move |_| {
        counter.set(counter.get() + 1);
        let value = if flag.state() { left.state() } else { right.state() };
        Ok(Update::Value(value))
    });

    assert_eq!(picked.peek(), 1);
    assert_eq!(a.subscriber_count(), 1);
    assert_eq!(b.subscriber_count(), 0);

    use_a.set(false);
    assert_eq!(picked.peek(), 10);
    assert_eq!(a.subscriber_count(), 0);
    assert_eq!(b.subscriber_count(), 1);

    let before = runs.get();
    a.set(2);
    assert_eq!(runs.get(), before);

    b.set(11);
    assert_eq!(runs.get(), before + 1);
    assert_eq!(picked.peek(), 11);
}

/// A watcher reruns once per change of what it read.
#[test]
fn watcher_follows_computed_atoms() {
    let count = Atom::new(1);
    let input = count.clone();
    let doubled = Atom::computed(move |_| Ok(Update::Value(input.state() * 2)));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (source, log) = (doubled.clone(), Rc::clone(&seen));
    let watcher = watch(move || log.borrow_mut().push(source.state()));

    count.set(2);
    count.set(3);
    watcher.dispose();
    count.set(4);

    assert_eq!(*seen.borrow(), vec![2, 4, 6]);
}

/// Only the most recent asynchronous update lands, however the futures
/// resolve.
#[tokio::test(start_paused = true)]
async fn newest_async_update_wins() {
    LocalSet::new()
        .run_until(async {
            let a = Atom::new(1);
            let source = a.clone();
            let sum = Atom::computed(move |_| Ok(Update::Wait(wait(source.clone(), |x| Ok(Update::Value(x * 2)))?)));
            assert_eq!(sum.peek(), 2);

            a.set_future(delay_value(Duration::from_millis(10), 5));
            a.set_future(delay_value(Duration::from_millis(5), 9));
            assert!(a.loading());

            tokio::time::sleep(Duration::from_millis(7)).await;
            assert_eq!(a.peek(), 9);
            assert_eq!(sum.peek(), 18);

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(a.peek(), 9);
            assert_eq!(sum.peek(), 18);
            assert!(!a.loading());
        })
        .await;
}

/// A failed update keeps the last good value, and the next change retries.
#[tokio::test(start_paused = true)]
async fn error_keeps_last_value_until_next_change() {
    LocalSet::new()
        .run_until(async {
            let a = Atom::new(1);
            a.set_future(delay_error(Duration::from_millis(5), Error::msg("offline")));

            let settled = a.settled().await;
            assert!(settled.is_err());
            assert_eq!(a.peek(), 1);
            assert!(a.error().is_some());

            a.set(2);
            assert_eq!(a.peek(), 2);
            assert!(a.error().is_none());
        })
        .await;
}

/// Reverting a snapshot restores the exact captured state.
#[test]
fn snapshot_revert_is_exact() {
    let count = Atom::new(0);
    count.set(1);
    let revert = count.snapshot(false);

    count.set(99);
    assert!(revert.revert());
    assert_eq!(count.peek(), 1);
}

/// Family cells are created once per key until deleted.
#[test]
fn family_identity_and_deletion() {
    let created = Rc::new(Cell::new(0));
    let counter = Rc::clone(&created);
    let cells = Family::new(move |&(x, y): &(i32, i32)| {
        counter.set(counter.get() + 1);
        Atom::new(x + y)
    });

    let first = cells.get((1, 2));
    let again = cells.get((1, 2));
    assert!(Atom::ptr_eq(&first, &again));
    assert_eq!(first.peek(), 3);
    assert_eq!(created.get(), 1);

    assert!(cells.has(&(1, 2)));
    assert!(cells.delete(&(1, 2)).is_some());
    assert!(!cells.has(&(1, 2)));

    let fresh = cells.get((1, 2));
    assert!(!Atom::ptr_eq(&first, &fresh));
    assert_eq!(created.get(), 2);
}

/// Returning a raw future from a computed atom is a usage error.
#[test]
#[should_panic(expected = "wrap asynchronous work")]
fn computed_future_is_rejected() {
    let _atom: Atom<i32> = Atom::computed(|_| Ok(Update::Future(delay_value(Duration::from_millis(1), 1))));
}
