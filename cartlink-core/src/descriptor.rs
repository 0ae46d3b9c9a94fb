use url::Url;

use crate::{AddressSpace, Capability};

/// Immutable record produced by a detection pass.
///
/// Descriptors are recomputed on every pass and never cached beyond the
/// pass that produced them.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// `<kind>://<host>[/<path>]` locating the endpoint.
    pub uri: Url,
    /// Human-readable name for device pickers.
    pub display_name: String,
    /// The driver kind that produced this descriptor.
    pub kind: &'static str,
    /// The driver's full declared capability set.
    pub capabilities: &'static [Capability],
    /// Address space requests default to when unspecified.
    pub default_address_space: AddressSpace,
    /// System tag; always `"snes"` for this multiplexer.
    pub system: &'static str,
}
