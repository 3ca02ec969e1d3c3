//! Keycloak session lifecycle: token storage, exchange, scheduled refresh and
//! the session facade tying them together.

pub mod claims;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

pub use claims::Claims;
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use discovery::{
    DiscoveryDocument, DiscoveryResolver, HttpDiscovery, KeycloakDiscovery, StaticDiscovery,
};
pub use error::{AuthError, ErrorCategory};
pub use exchange::{ClientParams, RefreshFailure};
pub use flow::{AuthRequest, AuthRequestParams, AuthResponse, AuthorizationFlow};
pub use scheduler::{RefreshScheduler, RefreshState};
pub use session::{RefreshOutcome, Session, SessionBuilder, SessionSnapshot};
pub use store::{FileStorage, MemoryStorage, SecureStorage, TokenStore};
pub use token::TokenSet;
pub use transport::{FormParams, HttpTransport, TokenResponse, TokenTransport};
