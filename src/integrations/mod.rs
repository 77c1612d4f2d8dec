//! External service integrations.

pub mod store_client {
    pub use crate::store_client::*;
}

pub mod session {
    pub use crate::session::*;
}
