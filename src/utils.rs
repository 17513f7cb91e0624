//! Shared small types. `Unit` exists purely for wire-protocol fidelity —
//! spec.md §8 invariant 5 requires `CurrentLimit.unit = MINUTE` whenever a
//! limit is populated, but the full Envoy `RateLimit.Unit` enum is carried
//! end to end so the proto conversion in `rpc.rs` stays a straight mapping
//! rather than a partial one.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
}
