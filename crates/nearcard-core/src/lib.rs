//! nearcard-core — contact record, compact codec, and packet wire format.
//! All other nearcard crates depend on this one.

pub mod codec;
pub mod config;
pub mod contact;
pub mod wire;

pub use codec::{decode, encode, CodecError};
pub use contact::ContactRecord;
pub use wire::{frame, PacketPart, ServiceId, SessionId, WireError};
