//! Authenticated git invocation: the environment that routes prompts to the
//! trampoline, checkout argument construction, progress parsing, and
//! classification of failures.

mod checkout;
mod environment;
mod error;
mod progress;

pub use checkout::{Checkout, CheckoutTarget, ConflictResolution, checkout_args, network_arguments};
pub use environment::{
    GitAccount, NoProxy, ProxyResolver, Repository, SystemProxyResolver, TrampolineSession,
    env_for_remote_operation, fallback_url_for_proxy_resolve,
};
pub use error::{AuthFailure, GitError};
pub use progress::{
    CHECKOUT_KIND, CheckoutProgress, CheckoutProgressParser, ParsedProgress, ProgressLineSplitter,
};
