use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::Subscription;

/// Async view of a [`Cell`](crate::Cell)'s values, created by
/// [`Cell::stream`](crate::Cell::stream).
///
/// Every value the cell stores while the receiver is alive is buffered, so a
/// slow consumer sees each delivery in order. Dropping the receiver
/// unsubscribes.
#[derive(Debug)]
pub struct CellReceiver<T> {
	rx: mpsc::UnboundedReceiver<T>,
	_subscription: Subscription,
}

impl<T> CellReceiver<T> {
	pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, subscription: Subscription) -> Self {
		Self {
			rx,
			_subscription: subscription,
		}
	}

	/// Waits for the next value.
	pub async fn recv(&mut self) -> Option<T> {
		self.rx.recv().await
	}

	/// Returns a buffered value without waiting.
	pub fn try_recv(&mut self) -> Option<T> {
		self.rx.try_recv().ok()
	}
}

impl<T> Stream for CellReceiver<T> {
	type Item = T;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
		self.rx.poll_recv(cx)
	}
}
