//! Metadata module - composite metadata and the well-known entry formats.
//!
//! Provides:
//! - [`WellKnownMimeType`] - the compressed mime type registry
//! - [`CompositeMetadata`] - encode/decode of length-prefixed entries
//! - Authentication and routing entry payload codecs

mod auth;
mod composite;
mod mime;
mod routing;

pub use auth::{
    decode_auth_metadata, decode_simple_auth_payload, encode_bearer_auth_metadata,
    encode_custom_auth_metadata, encode_simple_auth_metadata, AuthMetadata, AuthType,
    WellKnownAuthType, MAX_USERNAME_LENGTH,
};
pub use composite::{
    decode_composite_metadata, encode_and_add_custom_metadata,
    encode_and_add_well_known_metadata, encode_composite_metadata, encode_entry,
    encode_entry_into, CompositeMetadata, CompositeMetadataIter, Entry, MimeKey,
    MAX_MIME_LENGTH,
};
pub use mime::{WellKnownMimeType, MAX_WELL_KNOWN_ID};
pub use routing::{decode_routes, encode_route, encode_routes, RouteIter, MAX_ROUTE_LENGTH};
