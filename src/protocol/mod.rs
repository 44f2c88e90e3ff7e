//! Relay wire protocol: packet model and length-prefixed framing

pub mod codec;
pub mod packet;

pub use codec::{decode, encode, read_packet, PacketWriter};
pub use packet::{JoinRequest, Packet, PacketType, SystemNotice};
