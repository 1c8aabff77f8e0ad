//! Background worker threads for units that move data while playing.

use crate::data::DataItem;
use crate::error::UnitError;
use crate::pad::{Delivery, Pad};
use crate::unit::UnitContext;
use flume::{Receiver, Selector, Sender, TryRecvError};
use std::thread;
use tracing::{error, info};

/// A running worker thread, stopped and joined on `stop`.
pub(crate) struct Worker {
    name: String,
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Stop request handed to a worker body.
pub(crate) struct StopSignal(Receiver<()>);

impl StopSignal {
    /// Non-blocking check, for workers that are not waiting on an input.
    pub(crate) fn is_set(&self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }

    /// Push `item` on `pad`, waiting for room unless a stop arrives first.
    pub(crate) fn push(&self, pad: &Pad, item: DataItem) -> Result<Delivery, UnitError> {
        pad.push_or_stop(item, &self.0)
    }
}

/// What a worker waiting on its inputs woke up for.
pub(crate) enum Next {
    Item(usize, DataItem),
    Stop,
}

/// Block until an input has an item or a stop is requested.
pub(crate) fn next_item(inputs: &[Receiver<DataItem>], stop: &StopSignal) -> Next {
    let mut selector = Selector::new();
    for (index, rx) in inputs.iter().enumerate() {
        selector = selector.recv(rx, move |msg| match msg {
            Ok(item) => Next::Item(index, item),
            // The pad keeps its own sender alive, so a disconnect means shutdown.
            Err(_) => Next::Stop,
        });
    }
    selector = selector.recv(&stop.0, |_| Next::Stop);
    selector.wait()
}

impl Worker {
    /// Spawn `body` on a thread named after the unit.
    pub(crate) fn spawn<F>(ctx: &UnitContext, body: F) -> Result<Self, UnitError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (stop_tx, stop_rx) = flume::bounded(1);
        let name = ctx.name().to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(StopSignal(stop_rx)))?;
        info!("Unit thread '{}' started.", name);
        Ok(Self {
            name,
            stop_tx,
            handle,
        })
    }

    /// Ask the worker to stop and wait for it.
    pub(crate) fn stop(self) {
        // Fails only if the worker already finished on its own.
        let _ = self.stop_tx.try_send(());
        if self.handle.join().is_err() {
            error!("Unit thread '{}' panicked.", self.name);
        } else {
            info!("Unit thread '{}' finished.", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::pad::PadTable;
    use std::sync::Arc;

    #[test]
    fn test_worker_stops_on_request() {
        let bus = Bus::new();
        let ctx = UnitContext::new("w", bus.sender(), Arc::new(PadTable::new("w", vec![])));
        let (input_tx, input_rx) = flume::unbounded::<DataItem>();
        let (seen_tx, seen_rx) = flume::unbounded();

        let worker = Worker::spawn(&ctx, move |stop| loop {
            match next_item(std::slice::from_ref(&input_rx), &stop) {
                Next::Item(_, item) => seen_tx.send(item).unwrap(),
                Next::Stop => break,
            }
        })
        .unwrap();

        input_tx.send(DataItem::Eos).unwrap();
        assert_eq!(seen_rx.recv().unwrap(), DataItem::Eos);
        worker.stop();
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_signal_polling() {
        let (tx, rx) = flume::bounded(1);
        let signal = StopSignal(rx);
        assert!(!signal.is_set());
        tx.send(()).unwrap();
        assert!(signal.is_set());
    }
}
