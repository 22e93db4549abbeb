// ── Device registry ──
//
// Endpoint and node indices behind one lock, plus the logic that applies
// REST polls and stream deltas to them.

mod delta;
mod refresh;
mod registry;

pub use delta::StreamMerge;
pub use refresh::{PollSummary, Upsert};
pub use registry::DeviceRegistry;
