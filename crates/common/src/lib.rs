/**
 * Canonical JSON serialization rule used everywhere
 *  a body is signed or hashed.
 */
pub mod canonical;
/**
 * Wire encoding helpers. Binary values cross the wire
 *  as base64url without padding.
 */
pub mod encoding;
/**
 * Persistence wrappers: every registry object is an
 *  {id, version, body} envelope, optionally signed.
 */
pub mod envelope;
/**
 * Type-tagged object identities.
 *  Mutable identities are random; immutable identities
 *  are content-addressed from the canonical body.
 */
pub mod identity;
/**
 * Path expressions addressing
 *  org/project/env/service/identity/instance.
 */
pub mod pathexp;
/**
 * Envelope body types, one per identity type tag.
 */
pub mod primitive;

pub mod prelude {
    pub use crate::canonical::to_canonical_vec;
    pub use crate::encoding::Base64Url;
    pub use crate::envelope::{Envelope, Signature, Signed};
    pub use crate::identity::{Id, ObjectType};
    pub use crate::pathexp::PathExp;
}
