use taleem_api::UserRef;
use taleem_store::StoreConfig;

/// Everything needed to assemble one messaging client for one signed-in user
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// REST root, e.g. `https://dashboard.example.org`
    pub api_base_url: String,

    /// Push endpoint root, e.g. `wss://dashboard.example.org`
    pub ws_base_url: String,

    /// Bearer credential carried by every REST call and push subscription
    pub token: String,

    /// The signed-in user; every `is_own` derivation compares against its id
    pub current_user: UserRef,

    /// Store tunables: poll interval and highlight window
    pub store: StoreConfig,
}

impl MessagingConfig {
    pub fn new(
        api_base_url: impl Into<String>,
        ws_base_url: impl Into<String>,
        token: impl Into<String>,
        current_user: UserRef,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_base_url: ws_base_url.into(),
            token: token.into(),
            current_user,
            store: StoreConfig::default(),
        }
    }
}
