//! Packet module - stream formats, validation and decoding.

pub mod channels;
pub mod decode;
pub mod deframer;
pub mod format;
pub mod replay;

pub use channels::ChannelView;
pub use decode::{DecodedSample, Field, decode_frame, decode_payload, field_names};
pub use deframer::{DeframeStats, Deframer, RawFrame};
pub use format::{
    FmLayout, FrameError, FrameLength, Integrity, PacketDescriptor, PacketFormat, PacketKind,
};
pub use replay::{LogReplay, ReplayItem};
