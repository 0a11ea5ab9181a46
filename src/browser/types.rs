//! Browser session types.

/// Cookie extracted from a logged-in browser page.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl BrowserCookie {
    /// `Set-Cookie` style header line for loading into an HTTP cookie jar.
    pub fn to_set_cookie(&self) -> String {
        let mut line = format!("{}={}", self.name, self.value);
        if !self.domain.is_empty() {
            line.push_str("; Domain=");
            line.push_str(&self.domain);
        }
        if !self.path.is_empty() {
            line.push_str("; Path=");
            line.push_str(&self.path);
        }
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cookie_line() {
        let cookie = BrowserCookie {
            name: "cftpSID".to_string(),
            value: "abc123".to_string(),
            domain: ".publishedprices.co.il".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
        };
        assert_eq!(
            cookie.to_set_cookie(),
            "cftpSID=abc123; Domain=.publishedprices.co.il; Path=/; Secure"
        );
    }
}
