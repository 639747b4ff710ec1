//! Publishes `ManagedState` from the reconciler to the monitor with
//! read-copy-update semantics: readers always see either the previous or
//! the newly-published snapshot, never a partial one (§3, §5).

use tokio::sync::watch;

use crate::model::ManagedState;

#[derive(Clone)]
pub struct StateWriter(watch::Sender<ManagedState>);

#[derive(Clone)]
pub struct StateReader(watch::Receiver<ManagedState>);

pub fn channel() -> (StateWriter, StateReader) {
    let (tx, rx) = watch::channel(ManagedState::default());
    (StateWriter(tx), StateReader(rx))
}

impl StateWriter {
    pub fn publish(&self, state: ManagedState) {
        self.0.send_replace(state);
    }
}

impl StateReader {
    /// A consistent snapshot as of the most recent publish (§3).
    pub fn snapshot(&self) -> ManagedState {
        self.0.borrow().clone()
    }
}
