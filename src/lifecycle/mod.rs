//! Process lifecycle: OS signals and cooperative cancellation

mod cancel;
mod shutdown;

pub use cancel::CancelToken;
pub use shutdown::ShutdownSignal;
