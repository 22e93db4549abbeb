// ── Device model ──
//
// A physical ZigBee device is a `Node`; each sensor or actuator channel it
// exposes is an `Endpoint`. The gateway addresses endpoints by
// (resource class, local id) while downstream consumers know devices only
// by their stable name, so both views live here.

pub mod endpoint;
pub mod node;

pub use endpoint::{Endpoint, EndpointKey};
pub use node::Node;

/// A JSON object, as carried in `state` / `config` sub-objects.
pub use zigbridge_api::gateway::Fields;
