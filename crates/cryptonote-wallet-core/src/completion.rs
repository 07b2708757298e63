//! One-shot bridge from completion callbacks to synchronous waits.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Registers `request` with a callback that stores the result and wakes the
/// caller, then blocks until the result arrives. The callback may fire
/// before the wait starts; the slot check covers that.
pub(crate) fn wait_for<T, F>(request: F) -> T
where
    T: Send + 'static,
    F: FnOnce(Box<dyn FnOnce(T) + Send>),
{
    let shared: Arc<(Mutex<Option<T>>, Condvar)> = Arc::new((Mutex::new(None), Condvar::new()));

    let completion = shared.clone();
    request(Box::new(move |value| {
        let (slot, ready) = &*completion;
        *slot.lock() = Some(value);
        ready.notify_one();
    }));

    let (slot, ready) = &*shared;
    let mut guard = slot.lock();
    while guard.is_none() {
        ready.wait(&mut guard);
    }
    guard.take().expect("completion slot filled")
}
