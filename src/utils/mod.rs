pub(crate) mod scope_guard;
pub(crate) mod slab;

pub(crate) use scope_guard::ScopeGuard;
pub(crate) use slab::{Key, Slab};
