//! Session lifecycle: derived state and the controller that publishes it.

pub mod controller;
pub mod state;

pub use controller::SessionController;
pub use state::SessionState;
