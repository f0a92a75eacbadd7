use serde::{Deserialize, Serialize};

use super::{is_not, CancelMode, ClientRoles, InvocationPolicy, MatchingPolicy, RouterRoles, URI};

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct HelloDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    roles: ClientRoles,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authid: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authmethods: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct WelcomeDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    roles: RouterRoles,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authrole: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authmethod: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct ChallengeDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct AuthenticateOptions {}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct SubscribeOptions {
    #[serde(
        default,
        rename = "match",
        skip_serializing_if = "MatchingPolicy::is_strict"
    )]
    pub pattern_match: MatchingPolicy,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
pub struct PublishOptions {
    #[serde(default, skip_serializing_if = "is_not")]
    acknowledge: bool,

    #[serde(default = "default_true", rename = "exclude_me")]
    exclude_me: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    eligible: Option<Vec<u64>>,
}

fn default_true() -> bool {
    true
}

impl Default for PublishOptions {
    fn default() -> PublishOptions {
        PublishOptions {
            acknowledge: false,
            exclude_me: true,
            exclude: Vec::new(),
            eligible: None,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RegisterOptions {
    #[serde(
        default,
        rename = "match",
        skip_serializing_if = "MatchingPolicy::is_strict"
    )]
    pub pattern_match: MatchingPolicy,

    #[serde(
        default,
        rename = "invoke",
        skip_serializing_if = "InvocationPolicy::is_single"
    )]
    pub invocation_policy: InvocationPolicy,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct CallOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "is_not", rename = "receive_progress")]
    pub receive_progress: bool,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct YieldOptions {
    #[serde(default, skip_serializing_if = "is_not")]
    pub progress: bool,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct CancelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mode")]
    pub mode: Option<CancelMode>,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct InterruptOptions {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mode")]
    pub mode: Option<CancelMode>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct EventDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    trustlevel: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<URI>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct InvocationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<URI>,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct ResultDetails {
    #[serde(default, skip_serializing_if = "is_not")]
    pub progress: bool,
}

impl HelloDetails {
    pub fn new(roles: ClientRoles) -> HelloDetails {
        HelloDetails {
            roles,
            agent: None,
            authid: None,
            authmethods: Vec::new(),
        }
    }

    pub fn new_with_agent(roles: ClientRoles, agent: &str) -> HelloDetails {
        HelloDetails {
            roles,
            agent: Some(agent.to_string()),
            authid: None,
            authmethods: Vec::new(),
        }
    }

    pub fn new_with_auth(roles: ClientRoles, authid: &str, authmethods: Vec<String>) -> HelloDetails {
        HelloDetails {
            roles,
            agent: None,
            authid: Some(authid.to_string()),
            authmethods,
        }
    }
}

impl WelcomeDetails {
    pub fn new(roles: RouterRoles) -> WelcomeDetails {
        WelcomeDetails {
            roles,
            agent: None,
            authid: None,
            authrole: None,
            authmethod: None,
        }
    }

    pub fn new_with_agent(roles: RouterRoles, agent: &str) -> WelcomeDetails {
        WelcomeDetails {
            roles,
            agent: Some(agent.to_string()),
            authid: None,
            authrole: None,
            authmethod: None,
        }
    }
}

impl ChallengeDetails {
    pub fn new(challenge: &str) -> ChallengeDetails {
        ChallengeDetails {
            challenge: Some(challenge.to_string()),
            salt: None,
        }
    }
}

impl AuthenticateOptions {
    pub fn new() -> AuthenticateOptions {
        AuthenticateOptions {}
    }
}

impl ErrorDetails {
    pub fn new() -> ErrorDetails {
        ErrorDetails { message: None }
    }

    pub fn new_with_message(message: &str) -> ErrorDetails {
        ErrorDetails {
            message: Some(message.to_string()),
        }
    }
}

impl SubscribeOptions {
    pub fn new() -> SubscribeOptions {
        SubscribeOptions {
            pattern_match: MatchingPolicy::Strict,
        }
    }
}

impl PublishOptions {
    pub fn new(acknowledge: bool) -> PublishOptions {
        PublishOptions {
            acknowledge,
            ..PublishOptions::default()
        }
    }

    pub fn should_acknowledge(&self) -> bool {
        self.acknowledge
    }

    pub fn should_exclude_me(&self) -> bool {
        self.exclude_me
    }

    pub fn excluded(&self) -> &[u64] {
        &self.exclude
    }

    pub fn eligible(&self) -> Option<&[u64]> {
        self.eligible.as_deref()
    }

    pub fn with_exclude_me(mut self, exclude_me: bool) -> PublishOptions {
        self.exclude_me = exclude_me;
        self
    }

    pub fn with_excluded(mut self, excluded: Vec<u64>) -> PublishOptions {
        self.exclude = excluded;
        self
    }

    pub fn with_eligible(mut self, eligible: Vec<u64>) -> PublishOptions {
        self.eligible = Some(eligible);
        self
    }
}

impl RegisterOptions {
    pub fn new() -> RegisterOptions {
        RegisterOptions {
            pattern_match: MatchingPolicy::Strict,
            invocation_policy: InvocationPolicy::Single,
        }
    }
}

impl CallOptions {
    pub fn new() -> CallOptions {
        CallOptions {
            timeout: None,
            receive_progress: false,
        }
    }

    pub fn new_with_timeout(timeout_ms: u64) -> CallOptions {
        CallOptions {
            timeout: Some(timeout_ms),
            receive_progress: false,
        }
    }
}

impl YieldOptions {
    pub fn new() -> YieldOptions {
        YieldOptions { progress: false }
    }

    pub fn new_progressive() -> YieldOptions {
        YieldOptions { progress: true }
    }
}

impl CancelOptions {
    pub fn new(mode: CancelMode) -> CancelOptions {
        CancelOptions { mode: Some(mode) }
    }
}

impl InterruptOptions {
    pub fn new(mode: CancelMode) -> InterruptOptions {
        InterruptOptions { mode: Some(mode) }
    }
}

impl EventDetails {
    pub fn new() -> EventDetails {
        EventDetails {
            publisher: None,
            trustlevel: None,
            topic: None,
        }
    }

    pub fn new_with_topic(topic: URI) -> EventDetails {
        EventDetails {
            publisher: None,
            trustlevel: None,
            topic: Some(topic),
        }
    }
}

impl InvocationDetails {
    pub fn new() -> InvocationDetails {
        InvocationDetails { procedure: None }
    }
}

impl ResultDetails {
    pub fn new() -> ResultDetails {
        ResultDetails { progress: false }
    }

    pub fn new_progressive() -> ResultDetails {
        ResultDetails { progress: true }
    }
}
