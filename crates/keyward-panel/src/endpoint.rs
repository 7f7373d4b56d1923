use keyward_core::error::CoreError;

/// A normalized `scheme://host[:port][/path]` base URL for a remote panel.
///
/// Construction is the only place that parses operator-supplied host
/// strings — every other panel operation works off this value, never a
/// raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelEndpoint {
    base: String,
}

impl PanelEndpoint {
    /// Normalize a raw operator-supplied host string. Defaults the scheme
    /// to `https` when missing, preserves any path prefix, and rejects
    /// input with an empty netloc.
    pub fn normalize(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::validation("panel host is empty"));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };

        let parsed = url::Url::parse(&with_scheme)
            .map_err(|e| CoreError::validation(format!("invalid panel host: {e}")))?;

        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(CoreError::validation("panel host has empty netloc"));
        }

        let mut base = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap()
        );
        if let Some(port) = parsed.port() {
            base.push(':');
            base.push_str(&port.to_string());
        }
        let path = parsed.path().trim_end_matches('/');
        base.push_str(path);

        Ok(Self { base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.base, suffix)
    }

    /// Bare host (no scheme/port/path), used when rendering `vless://` URIs.
    pub fn host_only(&self) -> &str {
        self.base
            .split("://")
            .nth(1)
            .unwrap_or(&self.base)
            .split(':')
            .next()
            .unwrap_or(&self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_and_port_gets_https_default() {
        let endpoint = PanelEndpoint::normalize("1.2.3.4:5").unwrap();
        assert_eq!(endpoint.base(), "https://1.2.3.4:5");
    }

    #[test]
    fn scheme_and_path_are_preserved() {
        let endpoint = PanelEndpoint::normalize("http://x.y/z").unwrap();
        assert_eq!(endpoint.base(), "http://x.y/z");
    }

    #[test]
    fn empty_input_is_rejected_without_io() {
        assert!(PanelEndpoint::normalize("").is_err());
    }

    #[test]
    fn unparsable_input_is_rejected() {
        assert!(PanelEndpoint::normalize("://///").is_err());
    }
}
