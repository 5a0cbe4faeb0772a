//! Session manager - the one-shot handshake that opens a device session

use super::network::{NetworkInfo, NetworkProbe};
use super::SessionError;
use reqwest::Url;
use serde_json::Value;
use simiot_shared::{now_ms, timing, DeviceIdentity, Session, SessionToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Static handshake parameters
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Handshake endpoint
    pub endpoint: Url,
    /// Protocol version tag (`S[ptof]`)
    pub ptof: String,
    /// Country code (`S[country]`)
    pub country: String,
    /// Language tag (`S[lang]`)
    pub lang: String,
    /// Request timeout
    pub timeout: Duration,
}

impl HandshakeConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ptof: "180".into(),
            country: "225".into(),
            lang: "tr".into(),
            timeout: Duration::from_millis(timing::REQUEST_TIMEOUT_MS),
        }
    }
}

/// Build the handshake URL; parameter order follows the backend's expectations
pub fn build_handshake_url(
    config: &HandshakeConfig,
    identity: &DeviceIdentity,
    token: &SessionToken,
    network: &NetworkInfo,
    timestamp_ms: u64,
) -> Url {
    let mut url = config.endpoint.clone();
    let local_ip = network.ip.to_string();
    url.query_pairs_mut()
        .append_pair("pts", &timestamp_ms.to_string())
        .append_pair("S[S]", token.as_str())
        .append_pair("S[ptof]", &config.ptof)
        .append_pair("S[country]", &config.country)
        .append_pair("S[lang]", &config.lang)
        .append_pair("S[serial_no]", &identity.serial_no)
        .append_pair("S[serial_no_hw]", &identity.serial_no_hw)
        .append_pair("sample_short_code", &identity.short_code)
        .append_pair("sample_firmware", &identity.firmware)
        .append_pair("sample_mac_id", &network.mac)
        .append_pair("sample_local_ip", &local_ip)
        .append_pair("sample_oper", &identity.oper_mode)
        .append_pair("sample_mdl_id", &identity.model_id)
        .append_pair("sample_sites_id", &identity.site_id);
    url
}

/// Ids arrive as strings or numbers; null and empty strings count as absent
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turn the handshake response body into a Session
///
/// Only malformed JSON is an invalid response; any well-formed body without
/// a usable `data.S` is a missing session id.
pub fn parse_handshake_body(body: &str) -> Result<Session, SessionError> {
    let response: Value = serde_json::from_str(body)?;
    let data = response
        .get("data")
        .filter(|data| data.is_object())
        .ok_or(SessionError::SessionIdMissing)?;

    let session_id = id_string(data.get("S")).ok_or(SessionError::SessionIdMissing)?;

    Ok(Session {
        session_id,
        organization_id: id_string(data.get("corps_id")),
        location_id: id_string(data.get("corps_locations_id")),
        device_id: id_string(data.get("devices_id")),
    })
}

/// Performs the session handshake
pub struct SessionManager {
    client: reqwest::Client,
    config: HandshakeConfig,
    network: Arc<dyn NetworkProbe>,
}

impl SessionManager {
    pub fn new(config: HandshakeConfig, network: Arc<dyn NetworkProbe>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            network,
        })
    }

    /// Exchange the token and identity for a live Session
    pub async fn acquire_session(
        &self,
        identity: &DeviceIdentity,
        token: &SessionToken,
    ) -> Result<Session, SessionError> {
        let network = self.network.resolve();
        let url = build_handshake_url(&self.config, identity, token, &network, now_ms());
        debug!("Handshake URL: {}", url);

        let body = self.client.get(url).send().await?.text().await?;
        debug!("Handshake response: {}", body);

        let session = parse_handshake_body(&body)?;

        info!("Session ID: {}", session.session_id);
        info!("Organization ID: {}", session.organization_id.as_deref().unwrap_or("-"));
        info!("Location ID: {}", session.location_id.as_deref().unwrap_or("-"));
        info!("Device ID: {}", session.device_id.as_deref().unwrap_or("-"));

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::load_token;
    use mockito::{Matcher, Server};
    use std::net::Ipv4Addr;

    struct FixedNetwork;

    impl NetworkProbe for FixedNetwork {
        fn resolve(&self) -> NetworkInfo {
            NetworkInfo {
                ip: Ipv4Addr::new(192, 168, 1, 40),
                mac: "b8:27:eb:12:34:56".into(),
            }
        }
    }

    fn test_config(endpoint: &str) -> HandshakeConfig {
        HandshakeConfig::new(endpoint.parse().expect("endpoint url"))
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_token_file_flows_into_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessionID.txt");
        std::fs::write(&path, "abc123\n").unwrap();
        let token = load_token(&path).unwrap();

        let config = test_config("https://backend.example/devices/devicesopen");
        let url = build_handshake_url(
            &config,
            &DeviceIdentity::default(),
            &token,
            &FixedNetwork.resolve(),
            1_700_000_000_000,
        );

        assert_eq!(query_value(&url, "S[S]").as_deref(), Some("abc123"));
        assert!(url.query().unwrap().contains("S%5BS%5D=abc123"));
    }

    #[test]
    fn test_handshake_url_parameters() {
        let config = test_config("https://backend.example/devices/devicesopen");
        let token = SessionToken::parse("tok").unwrap();
        let url = build_handshake_url(
            &config,
            &DeviceIdentity::default(),
            &token,
            &FixedNetwork.resolve(),
            42,
        );

        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(
            keys,
            [
                "pts",
                "S[S]",
                "S[ptof]",
                "S[country]",
                "S[lang]",
                "S[serial_no]",
                "S[serial_no_hw]",
                "sample_short_code",
                "sample_firmware",
                "sample_mac_id",
                "sample_local_ip",
                "sample_oper",
                "sample_mdl_id",
                "sample_sites_id",
            ]
        );
        assert_eq!(query_value(&url, "pts").as_deref(), Some("42"));
        assert_eq!(query_value(&url, "S[serial_no]").as_deref(), Some("251306200097"));
        assert_eq!(query_value(&url, "sample_local_ip").as_deref(), Some("192.168.1.40"));
        assert_eq!(query_value(&url, "sample_mac_id").as_deref(), Some("b8:27:eb:12:34:56"));
        assert_eq!(url.path(), "/devices/devicesopen");
    }

    #[test]
    fn test_parse_full_response() {
        let body = r#"{"data":{"S":"sess-9","corps_id":12,"corps_locations_id":"34","devices_id":56}}"#;
        let session = parse_handshake_body(body).unwrap();
        assert_eq!(session.session_id, "sess-9");
        assert_eq!(session.organization_id.as_deref(), Some("12"));
        assert_eq!(session.location_id.as_deref(), Some("34"));
        assert_eq!(session.device_id.as_deref(), Some("56"));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let result = parse_handshake_body("<html>502 Bad Gateway</html>");
        assert!(matches!(result, Err(SessionError::InvalidResponse(_))));
        assert!(result.unwrap_err().to_string().starts_with("Invalid response"));
    }

    #[test]
    fn test_parse_rejects_missing_session_id() {
        let bodies = [
            r#"{"data":{}}"#,
            r#"{"data":{"S":""}}"#,
            r#"{"status":"ok"}"#,
            r#"{"data":null}"#,
            r#"{"data":[1]}"#,
            r#"{"data":"x"}"#,
            r#"{"data":["abc",null,null,null]}"#,
            r#"{"data":{"S":null}}"#,
            r#"{"data":{"S":{"id":"abc"}}}"#,
            "null",
            "[]",
            "42",
        ];
        for body in bodies {
            let result = parse_handshake_body(body);
            assert!(
                matches!(result, Err(SessionError::SessionIdMissing)),
                "body {} gave {:?}",
                body,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_acquire_session_against_backend() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/devices/devicesopen")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("S[S]".into(), "abc123".into()),
                Matcher::UrlEncoded("S[serial_no]".into(), "251306200097".into()),
                Matcher::UrlEncoded("sample_local_ip".into(), "192.168.1.40".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"S":"sess-1","corps_id":"7","corps_locations_id":"8","devices_id":"9"}}"#)
            .create_async()
            .await;

        let config = test_config(&format!("{}/devices/devicesopen", server.url()));
        let manager = SessionManager::new(config, Arc::new(FixedNetwork)).unwrap();
        let token = SessionToken::parse("abc123").unwrap();

        let session = manager
            .acquire_session(&DeviceIdentity::default(), &token)
            .await
            .unwrap();

        assert_eq!(session.session_id, "sess-1");
        assert_eq!(session.device_id.as_deref(), Some("9"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_acquire_session_without_id_is_fatal() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{"corps_id":1}}"#)
            .create_async()
            .await;

        let config = test_config(&format!("{}/devices/devicesopen", server.url()));
        let manager = SessionManager::new(config, Arc::new(FixedNetwork)).unwrap();
        let token = SessionToken::parse("abc123").unwrap();

        let result = manager.acquire_session(&DeviceIdentity::default(), &token).await;
        assert!(matches!(result, Err(SessionError::SessionIdMissing)));
    }
}
