//! Conversions from sub-behaviour events into [`NetworkEvent`](super::NetworkEvent),
//! one file per protocol.

mod identify;
mod kad;
mod mdns;
mod relay;
