#![forbid(unsafe_code)]

//!
//! Out-of-process authorization handshake for payment method tokenization.
//!
//! Completing some payment methods means handing control to an external actor
//! (an installed wallet application or the system browser) and later
//! reconciling its asynchronous, untrusted response with the request that
//! triggered it. The initiating process may be suspended or killed while
//! control is elsewhere, so correctness rests on durable correlation state,
//! not on anything in memory.
//!
//! Entry point is [`handshake::HandshakeContext`]: construct it with your
//! collaborators (HTTP dispatch, correlation store, scheduler, device
//! inspector, event sink), call [`handshake::HandshakeContext::begin`] to get
//! a switch instruction, hand control away, and feed the returned deep link
//! or wallet bundle to [`handshake::HandshakeContext::complete`].
//!

pub mod client;
pub mod configs;
pub mod consts;
pub mod crypto;
pub mod encoder;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handshake;
pub mod reconciler;
pub mod recipe;
pub mod request;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use self::{
    client::{HttpDispatch, RetryPolicy, RetryingRequestClient},
    errors::{CustomResult, SwitchError},
    handshake::{HandshakeContext, OutcomeListener, PendingSwitch, SwitchInstruction},
    recipe::{DeviceInspector, Recipe, RecipeKind, TargetSelector},
    storage::CorrelationStore,
    types::{AuthorizationRequest, CorrelationState, SwitchOutcome, SwitchReturn},
};
