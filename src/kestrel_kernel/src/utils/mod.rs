//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because port crates name the pool types in their configuration.
pub(crate) mod intrusive_list;
mod prio_bitmap;
mod veclike;
pub use self::{prio_bitmap::*, veclike::*};
