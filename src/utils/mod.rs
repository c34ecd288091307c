pub use cancel_token::*;
pub use flag::*;
pub use state_cell::*;

mod cancel_token;
mod flag;
pub mod logger;
mod state_cell;
