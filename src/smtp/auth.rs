//! LOGIN and XOAUTH2 SASL line construction (spec §6: `user=<email>\x01auth=Bearer
//! <token>\x01\x01` base64-encoded).

use base64::Engine;

pub fn login_username_line(email: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(email)
}

pub fn login_password_line(password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(password)
}

pub fn xoauth2_line(email: &str, access_token: &str) -> String {
    let raw = format!("user={email}\x01auth=Bearer {access_token}\x01\x01");
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn xoauth2_line_matches_sasl_layout() {
        let encoded = xoauth2_line("a@example.com", "tok");
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"user=a@example.com\x01auth=Bearer tok\x01\x01");
    }
}
