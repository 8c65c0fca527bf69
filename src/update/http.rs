//! Shared blocking HTTP agent.

use crate::config::NetworkConfig;

/// Build the agent used for both the manifest fetch and the artifact download.
///
/// Every request is bounded by the configured connect and overall timeouts so
/// a flaky endpoint cannot hang the update attempt.
pub fn http_agent(network: &NetworkConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(network.connect_timeout())
        .timeout(network.timeout())
        .user_agent(&network.user_agent)
        .build()
}

/// Describe a `ureq` failure, keeping the status code when there is one.
pub(crate) fn describe(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, resp) => {
            format!("unexpected status code: {code} ({})", resp.status_text())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}
