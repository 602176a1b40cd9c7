/// Which challenge the page presents.
#[derive(Debug, Clone)]
pub enum ChallengeKind {
    /// Stylesheet link carrying a single-use token.
    LinkToken { token: String },
    /// Turnstile widget posting to the verify endpoint.
    Turnstile { site_key: String },
}

/// Minimal HTML escaping for attribute and text positions.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the challenge page. `error` is shown above the challenge when a
/// previous attempt failed.
pub fn render_challenge_page(kind: &ChallengeKind, return_path: &str, error: Option<&str>) -> String {
    let return_path = escape_html(return_path);
    let error_block = error
        .map(|msg| format!(r#"<p class="error" role="alert">{}</p>"#, escape_html(msg)))
        .unwrap_or_default();

    let (head_extra, body) = match kind {
        ChallengeKind::LinkToken { token } => {
            let token = escape_html(token);
            (
                format!(
                    r#"<link rel="stylesheet" href="/limiter/{token}">
<meta http-equiv="refresh" content="2;url={return_path}">"#
                ),
                format!(
                    r#"<p>Checking your browser. You will be redirected shortly.</p>
<p><a href="{return_path}">Continue</a></p>"#
                ),
            )
        }
        ChallengeKind::Turnstile { site_key } => {
            let site_key = escape_html(site_key);
            (
                r#"<script src="https://challenges.cloudflare.com/turnstile/v0/api.js" async defer></script>"#
                    .to_string(),
                format!(
                    r#"<form id="challenge-area" method="post" action="/limiter/turnstile/verify">
<input type="hidden" name="return_path" value="{return_path}">
<div class="cf-turnstile" data-sitekey="{site_key}" data-callback="onVerified"></div>
<noscript><p>This check requires JavaScript.</p></noscript>
<button type="submit">Continue</button>
</form>
<script>function onVerified() {{ document.getElementById("challenge-area").submit(); }}</script>"#
                ),
            )
        }
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex">
<title>Just a moment...</title>
{head_extra}
<style>
body {{ font-family: -apple-system, sans-serif; display: flex; justify-content: center;
  align-items: center; min-height: 100vh; margin: 0; }}
.container {{ text-align: center; max-width: 420px; }}
.error {{ color: #b91c1c; }}
</style>
</head>
<body>
<div class="container">
<h2>Verifying you are human</h2>
{error_block}
{body}
</div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_token_page_embeds_stylesheet() {
        let page = render_challenge_page(
            &ChallengeKind::LinkToken {
                token: "abc_-123".into(),
            },
            "/users/1",
            None,
        );
        assert!(page.contains(r#"href="/limiter/abc_-123""#));
        assert!(page.contains("url=/users/1"));
        assert!(!page.contains("class=\"error\""));
    }

    #[test]
    fn turnstile_page_posts_to_verify() {
        let page = render_challenge_page(
            &ChallengeKind::Turnstile {
                site_key: "0x4AAA".into(),
            },
            "/",
            Some("Verification failed"),
        );
        assert!(page.contains(r#"action="/limiter/turnstile/verify""#));
        assert!(page.contains(r#"data-sitekey="0x4AAA""#));
        assert!(page.contains("Verification failed"));
    }

    #[test]
    fn return_path_is_escaped() {
        let page = render_challenge_page(
            &ChallengeKind::Turnstile {
                site_key: "k".into(),
            },
            "/a?b=\"><script>",
            None,
        );
        assert!(page.contains("/a?b=&quot;&gt;&lt;script&gt;"));
        assert!(!page.contains("\"><script>"));
    }
}
