pub mod models;
pub mod store;
pub mod repository;
pub mod memory;
pub mod events;
pub mod transactions;
pub mod cursors;

pub use cursors::StreamCursors;
pub use events::PaymentEvents;
pub use memory::InMemoryStatusStore;
pub use repository::PgStatusStore;
pub use store::StatusStore;
pub use transactions::PaymentTransactions;
