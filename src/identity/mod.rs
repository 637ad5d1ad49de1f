//! Identity for both entry surfaces: principals with capability claims,
//! cookie sessions for the browser UI, signed bearer tokens for the JSON
//! API, and the resolvers that translate a raw credential into a Principal.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod token;
mod resolver;

pub use principal::{Claim, Claims, Principal};
pub use session::{Session, SessionManager, SessionToken};
pub use token::{TokenIssuer, WikiClaims};
pub use resolver::{parse_cookie, BearerResolver, CredentialResolver, SessionResolver, SESSION_COOKIE};
