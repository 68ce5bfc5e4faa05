use crate::config::GatecamConfig;
use crate::error::TransportError;
use url::Url;

/// Scheme and authority of the page hosting the stream view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    pub secure: bool,
    pub host: String,
}

impl PageOrigin {
    /// Parse an origin such as `https://gate.example.com:8443`
    pub fn parse(origin: &str) -> Result<Self, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: origin.to_string(),
            reason,
        };

        let url = Url::parse(origin).map_err(|e| invalid(e.to_string()))?;
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(invalid(format!(
                    "page origin must be http or https, got '{}'",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("page origin has no host".to_string()))?;

        // `port()` is None for the scheme's default port
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self { secure, host })
    }

    pub fn ws_scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }
}

/// URLs of both live video transports for one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    pub mjpeg_url: String,
    pub ws_url: String,
}

impl StreamEndpoints {
    /// `<api-base>/video/stream?token=` and `<ws|wss>://<host>/ws/video?token=`
    pub fn derive(api_base: &str, origin: &PageOrigin, token: &str) -> Self {
        let token = urlencoding::encode(token);
        Self {
            mjpeg_url: format!(
                "{}/video/stream?token={}",
                api_base.trim_end_matches('/'),
                token
            ),
            ws_url: format!(
                "{}://{}/ws/video?token={}",
                origin.ws_scheme(),
                origin.host,
                token
            ),
        }
    }

    /// Explicit URLs replace the derived ones as-is
    pub fn with_overrides(mut self, mjpeg_url: Option<String>, ws_url: Option<String>) -> Self {
        if let Some(url) = mjpeg_url {
            self.mjpeg_url = url;
        }
        if let Some(url) = ws_url {
            self.ws_url = url;
        }
        self
    }

    pub fn from_config(config: &GatecamConfig, token: &str) -> Result<Self, TransportError> {
        let origin = PageOrigin::parse(&config.api.page_origin)?;
        Ok(Self::derive(&config.api.base_url, &origin, token).with_overrides(
            config.stream.mjpeg_url.clone(),
            config.stream.ws_url.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_scheme_mirrors_page() {
        let plain = PageOrigin::parse("http://gate.local:8080").unwrap();
        let secure = PageOrigin::parse("https://gate.example.com/dashboard").unwrap();

        assert_eq!(plain.ws_scheme(), "ws");
        assert_eq!(plain.host, "gate.local:8080");
        assert_eq!(secure.ws_scheme(), "wss");
        assert_eq!(secure.host, "gate.example.com");
    }

    #[test]
    fn test_invalid_origin() {
        assert!(PageOrigin::parse("gate.local").is_err());
        assert!(PageOrigin::parse("https://").is_err());
        assert!(matches!(
            PageOrigin::parse("file:///srv/dashboard/index.html"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_origin_ports() {
        let host = |origin: &str| PageOrigin::parse(origin).unwrap().host;

        assert_eq!(host("https://gate.example.com:443"), "gate.example.com");
        assert_eq!(host("https://gate.example.com:8443/"), "gate.example.com:8443");
        assert_eq!(host("http://[::1]:8000"), "[::1]:8000");
    }

    #[test]
    fn test_derive_endpoints() {
        let origin = PageOrigin::parse("https://gate.example.com").unwrap();
        let endpoints = StreamEndpoints::derive("https://gate.example.com/api/", &origin, "abc");

        assert_eq!(
            endpoints.mjpeg_url,
            "https://gate.example.com/api/video/stream?token=abc"
        );
        assert_eq!(
            endpoints.ws_url,
            "wss://gate.example.com/ws/video?token=abc"
        );
    }

    #[test]
    fn test_token_is_percent_encoded() {
        let origin = PageOrigin::parse("http://gate.local").unwrap();
        // base64 Basic tokens carry '+', '/' and '='
        let endpoints = StreamEndpoints::derive("http://gate.local", &origin, "YWRtaW46cA+/=");

        assert_eq!(
            endpoints.mjpeg_url,
            "http://gate.local/video/stream?token=YWRtaW46cA%2B%2F%3D"
        );
        assert_eq!(
            endpoints.ws_url,
            "ws://gate.local/ws/video?token=YWRtaW46cA%2B%2F%3D"
        );

        let spaced = StreamEndpoints::derive("http://gate.local", &origin, "a b&c");
        assert!(spaced.ws_url.ends_with("?token=a%20b%26c"));
    }

    #[test]
    fn test_overrides_win() {
        let origin = PageOrigin::parse("http://localhost:8000").unwrap();
        let endpoints = StreamEndpoints::derive("http://localhost:8000", &origin, "t")
            .with_overrides(None, Some("ws://other:9000/feed".to_string()));

        assert_eq!(endpoints.mjpeg_url, "http://localhost:8000/video/stream?token=t");
        assert_eq!(endpoints.ws_url, "ws://other:9000/feed");
    }

    #[test]
    fn test_from_config() {
        let mut config = GatecamConfig::default();
        config.stream.mjpeg_url = Some("http://cam:81/mjpeg".to_string());

        let endpoints = StreamEndpoints::from_config(&config, "tok").unwrap();

        assert_eq!(endpoints.mjpeg_url, "http://cam:81/mjpeg");
        assert_eq!(endpoints.ws_url, "ws://localhost:8000/ws/video?token=tok");
    }
}
