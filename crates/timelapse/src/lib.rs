pub mod composer;
pub mod config;
pub mod draw;
pub mod error;
pub mod flyover;
pub mod font;
pub mod frame;
pub mod overlay;
pub mod session;
pub mod source;

pub use composer::*;
pub use config::*;
pub use error::*;
pub use flyover::*;
pub use font::*;
pub use frame::*;
pub use overlay::*;
pub use session::*;
pub use source::*;
