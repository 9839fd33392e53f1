pub mod traits;
pub mod registry;
pub mod stellar;
pub mod flare;

pub use registry::{ProviderHandle, ProviderKind};
pub use traits::{PaymentProvider, PaymentStream};
