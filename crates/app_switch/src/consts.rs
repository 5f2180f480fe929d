//! Constants shared across the handshake components.

/// Header carrying the fixed client identifier on every gateway call.
pub const CLIENT_IDENTIFIER_HEADER: &str = "x-client-identifier";

/// Value sent in [`CLIENT_IDENTIFIER_HEADER`].
pub const CLIENT_IDENTIFIER: &str = concat!("app_switch/", env!("CARGO_PKG_VERSION"));

/// Fallback `Accept-Language` when the runtime locale cannot be determined.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Outbound request timeout, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Delay between retry attempts of one request.
pub const RETRY_DELAY_MILLIS: u64 = 250;

/// Default bound for `RetryPolicy::RetryUpTo` when callers take the
/// configured default.
pub const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Query parameter carrying the correlation token in plain-variant flows.
pub const CORRELATION_TOKEN_PARAM: &str = "token";

/// Query parameter carrying the base64 cleartext payload (encrypted variant).
pub const PAYLOAD_PARAM: &str = "payload";

/// Query parameter carrying the asymmetrically encrypted envelope.
pub const PAYLOAD_ENC_PARAM: &str = "payloadEnc";

/// Query parameter naming the initiating application.
pub const SOURCE_PARAM: &str = "x-source";

/// Query parameter carrying the success return target.
pub const SUCCESS_URL_PARAM: &str = "x-success";

/// Query parameter carrying the cancel return target.
pub const CANCEL_URL_PARAM: &str = "x-cancel";

/// Browser packages probed for `browser` recipes, in fallback priority
/// order. The first installed browser that can resolve the switch URL wins.
pub const KNOWN_BROWSER_PACKAGES: [&str; 5] = [
    "com.android.chrome",
    "org.mozilla.firefox",
    "com.sec.android.app.sbrowser",
    "com.opera.browser",
    "com.microsoft.emmx",
];

/// Base64 engine used for every encoded payload in the protocol.
pub const BASE64_ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Length of the symmetric key generated for encrypted-variant envelopes.
pub const AES_256_KEY_LEN: usize = 32;
