use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

use crate::CellReceiver;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct CellState<T> {
	value: Option<T>,
	observers: Vec<(u64, Observer<T>)>,
	next_key: u64,
}

/// Shared cell storage.
///
/// `state` guards the value and observer list and is only held for the
/// duration of a mutation. `dispatch` serializes writers and subscribers so
/// that notification order always matches storage order. It is re-entrant so
/// an observer may write to or subscribe to the cell that is notifying it.
struct CellInner<T> {
	state: Mutex<CellState<T>>,
	dispatch: ReentrantMutex<()>,
}

/// Removal hook used by [`Subscription`] without naming the cell's value type.
trait ObserverSet: Send + Sync {
	fn remove(&self, key: u64);
}

impl<T: Send> ObserverSet for CellInner<T> {
	fn remove(&self, key: u64) {
		self.state.lock().observers.retain(|(k, _)| *k != key);
	}
}

/// Single-value broadcast cell with replay-on-subscribe.
///
/// Cloning a `Cell` yields another handle to the same slot.
pub struct Cell<T> {
	inner: Arc<CellInner<T>>,
}

impl<T> Clone for Cell<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for Cell<T> {
	fn default() -> Self {
		Self::from_value(None)
	}
}

impl<T> Cell<T> {
	fn from_value(value: Option<T>) -> Self {
		Self {
			inner: Arc::new(CellInner {
				state: Mutex::new(CellState {
					value,
					observers: Vec::new(),
					next_key: 0,
				}),
				dispatch: ReentrantMutex::new(()),
			}),
		}
	}

	/// Creates an empty cell.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a cell already holding `value`.
	pub fn with_value(value: T) -> Self {
		Self::from_value(Some(value))
	}

	/// Returns `true` once any value has been set.
	pub fn has_value(&self) -> bool {
		self.inner.state.lock().value.is_some()
	}

	/// Number of live subscriptions.
	pub fn subscriber_count(&self) -> usize {
		self.inner.state.lock().observers.len()
	}

	/// Returns `true` if both handles refer to the same cell.
	pub fn ptr_eq(a: &Self, b: &Self) -> bool {
		Arc::ptr_eq(&a.inner, &b.inner)
	}
}

impl<T> Cell<T>
where
	T: Clone + Send + 'static,
{
	/// Returns the current value.
	pub fn get(&self) -> Option<T> {
		self.inner.state.lock().value.clone()
	}

	/// Stores `value` and notifies every current subscriber in subscription
	/// order.
	pub fn set(&self, value: T) {
		self.update(move |_| value);
	}

	/// Computes the next value from the current one, stores it, notifies
	/// subscribers, and returns the stored value.
	///
	/// No other write can land between reading the current value and storing
	/// the new one.
	pub fn update(&self, f: impl FnOnce(Option<&T>) -> T) -> T {
		let _dispatch = self.inner.dispatch.lock();
		let current = self.inner.state.lock().value.clone();
		let next = f(current.as_ref());

		let observers: Vec<Observer<T>> = {
			let mut state = self.inner.state.lock();
			state.value = Some(next.clone());
			state.observers.iter().map(|(_, observer)| Arc::clone(observer)).collect()
		};

		for observer in observers {
			observer(&next);
		}
		next
	}

	/// Registers `observer`.
	///
	/// If the cell holds a value, `observer` is called with it before this
	/// returns. Every later value is delivered until the returned
	/// [`Subscription`] is dropped or unsubscribed.
	pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
		let observer: Observer<T> = Arc::new(observer);
		let _dispatch = self.inner.dispatch.lock();

		let (key, current) = {
			let mut state = self.inner.state.lock();
			let key = state.next_key;
			state.next_key = state.next_key.wrapping_add(1);
			state.observers.push((key, Arc::clone(&observer)));
			(key, state.value.clone())
		};

		if let Some(value) = current {
			observer(&value);
		}

		let weak: Weak<dyn ObserverSet> = Arc::downgrade(&self.inner) as Weak<dyn ObserverSet>;
		Subscription { cell: Some(weak), key }
	}

	/// Returns an async receiver yielding the current value (if any) and
	/// then every later one.
	pub fn stream(&self) -> CellReceiver<T> {
		let (tx, rx) = mpsc::unbounded_channel();
		let subscription = self.subscribe(move |value: &T| {
			let _ = tx.send(value.clone());
		});
		CellReceiver::new(rx, subscription)
	}

	/// Resolves with the current value, or with the first value set.
	pub async fn wait(&self) -> T {
		let mut rx = self.stream();
		match rx.recv().await {
			Some(value) => value,
			// The sender lives in our own subscription, so the channel
			// cannot close while `rx` is alive.
			None => std::future::pending().await,
		}
	}
}

impl<T> fmt::Debug for Cell<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Cell")
			.field("has_value", &state.value.is_some())
			.field("subscribers", &state.observers.len())
			.finish()
	}
}

/// Handle to one observer registered with [`Cell::subscribe`].
///
/// Dropping the handle unsubscribes. The cell's value is never affected.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
	cell: Option<Weak<dyn ObserverSet>>,
	key: u64,
}

impl Subscription {
	/// Stops future notifications.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	/// Keeps the observer registered for the lifetime of the cell.
	pub fn detach(mut self) {
		self.cell = None;
	}

	fn release(&mut self) {
		if let Some(cell) = self.cell.take().and_then(|weak| weak.upgrade()) {
			cell.remove(self.key);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("key", &self.key)
			.field("attached", &self.cell.is_some())
			.finish()
	}
}
