//! Shared types: identifiers for entities, sessions and scene instances, plus
//! the spatial transform carried across quality swaps.

mod types;

pub use types::{EntityId, InstanceId, SessionId, Transform};

pub fn crate_info() -> &'static str {
    "vetscan-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
