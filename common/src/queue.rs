use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::stage::ExecutionCommand;

/// Buzón de salida por host. El scheduler encola, el transporte hacia los
/// agentes vacía.
#[derive(Debug, Default)]
pub struct ActionQueue {
    queues: Mutex<HashMap<String, VecDeque<ExecutionCommand>>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, host: &str, command: ExecutionCommand) {
        let mut queues = self.queues.lock();
        queues.entry(host.to_string()).or_default().push_back(command);
    }

    pub fn dequeue(&self, host: &str) -> Option<ExecutionCommand> {
        let mut queues = self.queues.lock();
        queues.get_mut(host).and_then(|q| q.pop_front())
    }

    /// Saca todo lo disponible para el host, en orden de llegada.
    pub fn drain(&self, host: &str) -> Vec<ExecutionCommand> {
        let mut queues = self.queues.lock();
        queues
            .remove(host)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn size(&self, host: &str) -> usize {
        self.queues.lock().get(host).map_or(0, |q| q.len())
    }
}
