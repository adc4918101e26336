//! Server-rendered pages for the login flow and the key portal.

use crate::keystore::ApiKey;
use crate::session::SessionUser;

const PAGE_CSS: &str = "\
body { font-family: sans-serif; margin: 2rem auto; max-width: 52rem; padding: 0 1rem; color: #222; }\
h1 { font-size: 1.4rem; }\
table { border-collapse: collapse; width: 100%; margin-top: 1rem; }\
th, td { border: 1px solid #ccc; padding: 0.4rem 0.6rem; text-align: left; font-size: 0.9rem; }\
th { background: #f4f4f4; }\
code { background: #f4f4f4; padding: 0.2rem 0.4rem; word-break: break-all; }\
.flash { border: 1px solid #2b7a2b; background: #eaf7ea; padding: 0.6rem 1rem; margin: 1rem 0; }\
.button { display: inline-block; background: #1a73e8; color: #fff; padding: 0.5rem 1rem; text-decoration: none; border-radius: 4px; }\
.topbar { display: flex; justify-content: space-between; align-items: baseline; }\
form.inline { display: inline; }";

/// Landing page with the Google sign-in link.
pub fn login_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>API Key Portal</title>
<style>{css}</style>
</head>
<body>
<main>
<h1>API Key Portal</h1>
<p>Sign in with your Google account to create and manage API keys for the filings service.</p>
<p><a class="button" href="/login">Sign in with Google</a></p>
</main>
</body>
</html>
"#,
        css = PAGE_CSS
    )
}

/// Key management page: create form, one-time flash for a freshly minted
/// key, and the key table with revoke buttons.
pub fn keys_page(user: &SessionUser, keys: &[ApiKey], flash_key: Option<&str>) -> String {
    let flash_block = match flash_key {
        Some(raw) => format!(
            r#"<div class="flash">
<p>New API key minted. Copy it now; only its hash is stored.</p>
<code>{}</code>
</div>"#,
            escape(raw)
        ),
        None => String::new(),
    };

    let rows: String = keys
        .iter()
        .map(|key| {
            format!(
                r#"<tr>
<td>{service}</td>
<td>{created}</td>
<td>{expires}</td>
<td>{revoked}</td>
<td><form class="inline" method="post" action="/keys/revoke"><input type="hidden" name="hash" value="{hash}"><button type="submit">Revoke</button></form></td>
</tr>"#,
                service = escape(&key.service),
                created = key.created_time(),
                expires = key.expires_time(),
                revoked = if key.revoked { "yes" } else { "no" },
                hash = escape(&key.hash),
            )
        })
        .collect();

    let greeting = match &user.name {
        Some(name) => format!("{} ({})", escape(name), escape(&user.email)),
        None => escape(&user.email),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>API Keys</title>
<style>{css}</style>
</head>
<body>
<main>
<div class="topbar">
<h1>API Keys</h1>
<p>{greeting} &middot; <a href="/logout">Log out</a></p>
</div>
{flash}
<form method="post" action="/keys/create">
<label>Service label <input type="text" name="label" placeholder="default"></label>
<button type="submit">Create key</button>
</form>
<table>
<tr><th>Service</th><th>Created</th><th>Expires</th><th>Revoked</th><th></th></tr>
{rows}
</table>
</main>
</body>
</html>
"#,
        css = PAGE_CSS,
        greeting = greeting,
        flash = flash_block,
        rows = rows,
    )
}

/// Minimal HTML escaping for interpolated values.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> SessionUser {
        SessionUser {
            sub: "10769150350006150715113082367".to_string(),
            email: "jane@example.com".to_string(),
            name: Some("Jane".to_string()),
            picture: None,
        }
    }

    fn sample_key(service: &str) -> ApiKey {
        ApiKey {
            hash: "aa11".to_string(),
            service: service.to_string(),
            created_at: 1_700_000_000,
            expires_at: 1_702_592_000,
            revoked: false,
        }
    }

    #[test]
    fn test_login_page_links_to_login() {
        let page = login_page();
        assert!(page.contains("href=\"/login\""));
        assert!(page.contains("Sign in with Google"));
    }

    #[test]
    fn test_keys_page_renders_rows_and_flash() {
        let keys = vec![sample_key("ci"), sample_key("staging")];
        let page = keys_page(&sample_user(), &keys, Some("sk_mcp_fresh"));

        assert!(page.contains("jane@example.com"));
        assert!(page.contains("<td>ci</td>"));
        assert!(page.contains("<td>staging</td>"));
        assert!(page.contains("sk_mcp_fresh"));
        assert!(page.contains("action=\"/keys/revoke\""));
        assert!(page.contains("action=\"/keys/create\""));
    }

    #[test]
    fn test_keys_page_without_flash() {
        let page = keys_page(&sample_user(), &[], None);
        assert!(!page.contains("class=\"flash\""));
    }

    #[test]
    fn test_interpolated_values_are_escaped() {
        let mut key = sample_key("<script>alert(1)</script>");
        key.hash = "\"><img src=x>".to_string();
        let page = keys_page(&sample_user(), &[key], None);

        assert!(!page.contains("<script>alert(1)</script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("value=\"\"><img"));
    }
}
