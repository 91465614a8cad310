use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The name of a workspace on the platform
#[braid(serde)]
pub struct Workspace;

/// A long-lived platform API key
#[braid(serde, debug = "owned", display = "owned")]
pub struct ApiKey;

limited_reveal!(ApiKeyRef: "API KEY", 5);

/// Client credentials, already packed as `base64(client_id:client_secret)`
#[braid(serde, debug = "owned", display = "owned")]
pub struct EncodedClientCredentials;

limited_reveal!(EncodedClientCredentialsRef: "CLIENT CREDENTIALS", 5);

/// A device code obtained from a device authorization login
#[braid(serde, debug = "owned", display = "owned")]
pub struct DeviceCode;

limited_reveal!(DeviceCodeRef: "DEVICE CODE", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted_by_default() {
        let key = ApiKey::from_static("sk_live_abcdefghijklmnop");
        assert_eq!(format!("{:?}", key), "***API KEY***");
        assert_eq!(key.to_string(), "***API KEY***");
    }

    #[test]
    fn alternate_debug_reveals_a_bounded_prefix() {
        let token = AccessToken::from_static("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(format!("{:#?}", token), "\"eyJhbGciOiJIUz…\"");
        assert_eq!(format!("{:#5?}", token), "\"eyJh…\"");
    }

    #[test]
    fn short_secrets_are_revealed_whole_in_alternate_form() {
        let code = DeviceCode::from_static("abc");
        assert_eq!(format!("{:#?}", code), "\"abc\"");
    }

    #[test]
    fn workspace_names_are_not_redacted() {
        let ws = Workspace::from_static("ws1");
        assert_eq!(ws.to_string(), "ws1");
    }
}
