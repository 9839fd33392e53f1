// Background payment loops: stream listener, event processor, reconciler
pub mod guard;
pub mod scheduler;
pub mod listener;
pub mod processor;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod testing;

pub use listener::PaymentListener;
pub use processor::EventProcessor;
pub use reconciler::TransactionReconciler;
pub use scheduler::spawn_periodic;
