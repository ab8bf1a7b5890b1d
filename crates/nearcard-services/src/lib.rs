//! nearcard-services — the stateful halves of the contact exchange.
//!
//! Broadcaster and Scanner drive an injected [`Radio`]; inbound frames land
//! in the shared [`ReassemblyCache`]. [`ProximityService`] is the surface the
//! host application talks to.

pub mod broadcaster;
pub mod profile;
pub mod proximity;
pub mod radio;
pub mod reassembly;
pub mod scanner;
pub mod store;

pub use broadcaster::{BroadcastClaim, BroadcastTiming, Broadcaster};
pub use profile::{ProfileError, ProfileStore};
pub use proximity::{ProximityError, ProximityService};
pub use radio::loopback::{LoopbackMedium, LoopbackRadio};
pub use radio::{AdvertiseSettings, FrameSink, Radio, RadioError, ScanFilter, ScanSettings};
pub use reassembly::ReassemblyCache;
pub use scanner::Scanner;
pub use store::{FlagStore, JsonFlagStore, MemoryFlagStore, StoreError, BROADCAST_ENABLED_KEY};
