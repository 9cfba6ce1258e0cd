//! Supervisor message protocol.
//!
//! JSON envelopes exchanged with the supervising process, the typed command
//! and event sets they carry, and the connection URL format.

pub mod codec;
pub mod types;
pub mod url;

pub use codec::{
    decode_command, decode_event, encode_command, encode_event, parse_envelope, to_json_line,
    DecodeError,
};
pub use types::{
    command, format_timestamp, CommandResultPayload, CommandStatus, ConnectionClosedPayload,
    ConnectionEstablishedPayload, ConnectionFailedPayload, ConnectionInfo, DialStartedPayload,
    Direction, Envelope, ErrorPayload, InboundCommand, OutboundEvent, PeerDiscoveredPayload,
    PeerListPayload, PeerSummary, ReadyPayload,
};
pub use url::{ConnectUrl, UrlError, DEFAULT_URL_SCHEME};
