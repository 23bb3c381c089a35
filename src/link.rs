use crate::config::ServerConfig;

/// Port clients reach the TLS terminator on
pub const TLS_PORT: u16 = 443;

/// status_page is the HTML served to plain HTTP requests
pub fn status_page() -> &'static str {
    "<h1>VLESS Proxy Server Running</h1>"
}

/// share_link formats the configuration as a `vless://` URI clients can import
pub fn share_link(config: &ServerConfig) -> String {
    let host = &config.hostname;
    format!(
        "vless://{uuid}@{host}:{TLS_PORT}?encryption=none&security=tls&sni={host}&fp=randomized&type=ws&host={host}&path={path}#{name}",
        uuid = config.credential,
        path = urlencoding(&config.path),
        name = urlencoding(host),
    )
}

/// Simple URL encoding
fn urlencoding(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_link_carries_config() {
        let config = ServerConfig::new("a10d76fd-25ec-4d5a-bdf1-6593a73e2e16".parse().unwrap())
            .with_hostname("vpn.example.com");

        assert_eq!(
            share_link(&config),
            "vless://a10d76fd-25ec-4d5a-bdf1-6593a73e2e16@vpn.example.com:443\
             ?encryption=none&security=tls&sni=vpn.example.com&fp=randomized\
             &type=ws&host=vpn.example.com&path=%2F%3Fed%3D2560#vpn.example.com"
        );
    }

    #[test]
    fn urlencoding_escapes_reserved_bytes() {
        assert_eq!(urlencoding("a b/ü"), "a%20b%2F%C3%BC");
        assert_eq!(urlencoding("safe-_.~"), "safe-_.~");
    }
}
